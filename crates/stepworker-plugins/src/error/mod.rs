//! Domain errors raised while starting and talking to plugins.
//!
//! Every variant names the plugin it concerns. I/O errors are wrapped in
//! `Arc` and client errors are boxed to keep the enum small.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use stepworker_plugin_sdk::ClientError;
use thiserror::Error;

use crate::resolver::MetadataError;
use crate::unpack::UnpackError;

/// Errors arising from the plugin start sequence and plugin calls.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No binary descriptor could be obtained for the plugin.
    #[error("no binary metadata available for plugin '{name}'")]
    MetadataUnavailable {
        /// Plugin name.
        name: String,
        /// Provider failure, when the provider reported one.
        #[source]
        source: Option<MetadataError>,
    },

    /// The staged artifact could not be read or extracted.
    #[error("failed to unpack plugin '{name}' from {path}: {source}")]
    UnpackFailed {
        /// Plugin name.
        name: String,
        /// Artifact path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: UnpackError,
    },

    /// The plugin command resolved neither on `PATH` nor in the base directory.
    #[error("plugin '{name}' executable '{command}' not found on PATH or in {base_dir}")]
    ExecutableNotFound {
        /// Plugin name.
        name: String,
        /// Command named by the descriptor.
        command: String,
        /// Base directory that was searched.
        base_dir: PathBuf,
    },

    /// The operating system refused to spawn the plugin process.
    #[error("plugin '{name}' failed to start: {source}")]
    SpawnFailed {
        /// Plugin name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The plugin did not announce its endpoint within the handshake window.
    #[error("plugin '{name}' did not announce an endpoint within {elapsed_ms}ms")]
    HandshakeTimeout {
        /// Plugin name.
        name: String,
        /// Time spent waiting, in milliseconds.
        elapsed_ms: u64,
    },

    /// The plugin exited before announcing its endpoint.
    #[error("plugin '{name}' exited before the handshake completed: {status}")]
    ChildExited {
        /// Plugin name.
        name: String,
        /// Observed exit status.
        status: ExitStatus,
    },

    /// The plugin announced an endpoint the worker cannot use.
    #[error("plugin '{name}' violated the readiness protocol: {message}")]
    ProtocolViolation {
        /// Plugin name.
        name: String,
        /// Description of the violation.
        message: String,
    },

    /// The job context was cancelled while the plugin was starting.
    #[error("start of plugin '{name}' was cancelled")]
    Cancelled {
        /// Plugin name.
        name: String,
    },

    /// Connecting to the announced endpoint failed.
    #[error("failed to connect to plugin '{name}': {source}")]
    Connect {
        /// Plugin name.
        name: String,
        /// Underlying client error.
        #[source]
        source: Box<ClientError>,
    },

    /// A call to the plugin failed.
    #[error("call '{method}' to plugin '{name}' failed: {source}")]
    Rpc {
        /// Plugin name.
        name: String,
        /// Method that was invoked.
        method: String,
        /// Underlying client error.
        #[source]
        source: Box<ClientError>,
    },
}

impl PluginError {
    /// Name of the plugin the error concerns.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        match self {
            Self::MetadataUnavailable { name, .. }
            | Self::UnpackFailed { name, .. }
            | Self::ExecutableNotFound { name, .. }
            | Self::SpawnFailed { name, .. }
            | Self::HandshakeTimeout { name, .. }
            | Self::ChildExited { name, .. }
            | Self::ProtocolViolation { name, .. }
            | Self::Cancelled { name }
            | Self::Connect { name, .. }
            | Self::Rpc { name, .. } => name,
        }
    }
}
