//! Command-line argument definitions for the worker binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stepworker_config::Config;

/// Command-line interface of the stepworker binary.
#[derive(Parser, Debug)]
#[command(name = "stepworker", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Worker configuration shared with embedding callers.
    #[command(flatten)]
    pub(crate) config: Config,
    /// Command to run.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Structured subcommands.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Starts a plugin, optionally performs one call, then stops it.
    RunPlugin(RunPluginArgs),
}

/// Arguments of `run-plugin`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunPluginArgs {
    /// Plugin name, also the artifact name under the base directory.
    #[arg(long)]
    pub(crate) name: String,
    /// JSON file listing plugin binary descriptors.
    ///
    /// Defaults to `plugins.json` inside the base directory.
    #[arg(long, value_name = "FILE")]
    pub(crate) descriptors: Option<PathBuf>,
    /// Working directory of the plugin; defaults to the base directory.
    #[arg(long, value_name = "DIR")]
    pub(crate) workdir: Option<PathBuf>,
    /// Environment override passed to the plugin, as `KEY=VALUE`.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_override)]
    pub(crate) env: Vec<(String, String)>,
    /// Method to call once the plugin is ready.
    #[arg(long, value_name = "METHOD")]
    pub(crate) call: Option<String>,
    /// JSON params of the call; defaults to an empty object.
    #[arg(long, value_name = "JSON", requires = "call")]
    pub(crate) params: Option<String>,
}

fn parse_env_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
