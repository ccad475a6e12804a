//! The `run-plugin` command: start one plugin under a supervisor.

use std::io::Write;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use stepworker_config::Config;
use stepworker_plugin_sdk::{JobContext, cancel_on_termination};
use stepworker_plugins::{
    JsonFileMetadataProvider, PluginSupervisor, StartOptions, SupervisorSettings,
};
use tracing::info;

use crate::cli::RunPluginArgs;
use crate::errors::AppError;

const RUN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run_plugin");

/// Descriptor file consulted when `--descriptors` is absent.
pub(crate) const DEFAULT_DESCRIPTORS_FILE: &str = "plugins.json";

/// Starts the plugin, then either performs the requested call and prints its
/// result, or waits for cancellation. The plugin is terminated either way.
pub(crate) fn run_plugin<W: Write>(
    config: &Config,
    args: RunPluginArgs,
    ctx: &JobContext,
    stdout: &mut W,
) -> Result<(), AppError> {
    let RunPluginArgs {
        name,
        descriptors,
        workdir,
        env,
        call,
        params: raw_params,
    } = args;
    let params = parse_params(raw_params.as_deref())?;

    let settings = SupervisorSettings::from_config(config);
    let descriptors_file =
        descriptors.unwrap_or_else(|| settings.base_dir().join(DEFAULT_DESCRIPTORS_FILE));
    let supervisor =
        PluginSupervisor::new(settings, Arc::new(JsonFileMetadataProvider::new(descriptors_file)));

    let mut options = StartOptions::new();
    if let Some(dir) = workdir {
        options = options.with_workdir(dir);
    }
    for (key, value) in env {
        options = options.with_env(key, value);
    }
    let handle = supervisor.start(ctx, &name, options)?;

    let outcome = match call {
        Some(method) => handle
            .call(&method, params)
            .map_err(AppError::from)
            .and_then(|result| emit(stdout, &result)),
        None => {
            let started = json!({
                "plugin": handle.name(),
                "pid": handle.pid(),
                "endpoint": handle.endpoint().display().to_string(),
            });
            let announced = emit(stdout, &started);
            if announced.is_ok() {
                info!(target: RUN_TARGET, plugin = %name, "waiting for a termination signal");
                ctx.wait();
            }
            announced
        }
    };
    supervisor.shutdown();
    outcome
}

/// Installs the termination signal handlers for `ctx`.
pub(crate) fn watch_signals(ctx: &JobContext) -> Result<(), AppError> {
    cancel_on_termination(ctx).map_err(|error| AppError::Signals(Arc::new(error)))
}

fn parse_params(raw: Option<&str>) -> Result<Value, AppError> {
    raw.map_or_else(
        || Ok(Value::Object(Map::new())),
        |text| serde_json::from_str(text).map_err(AppError::InvalidParams),
    )
}

fn emit<W: Write>(stdout: &mut W, value: &Value) -> Result<(), AppError> {
    let line = serde_json::to_string(value).map_err(AppError::SerialiseOutput)?;
    writeln!(stdout, "{line}").map_err(AppError::WriteOutput)
}
