//! Error types for the worker binary.

use std::io;
use std::sync::Arc;

use stepworker_config::ConfigError;
use stepworker_plugins::PluginError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("invalid call params: {0}")]
    InvalidParams(serde_json::Error),
    #[error("failed to install signal handlers: {0}")]
    Signals(Arc<io::Error>),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error("failed to serialise plugin output: {0}")]
    SerialiseOutput(serde_json::Error),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
}
