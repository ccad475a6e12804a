//! Worker runtime for supervising stepworker plugins.
//!
//! The crate owns argument parsing, telemetry, and the `run-plugin` command.
//! [`run`] is what the binary calls; tests drive the same entrypoint with
//! in-memory writers.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use stepworker_plugin_sdk::JobContext;

mod cli;
mod errors;
mod run_plugin;
mod telemetry;

use cli::{Cli, CliCommand};
use errors::AppError;
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};

/// Runs the CLI with `args`, writing results to `stdout` and diagnostics to
/// `stderr`.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_context(args, &JobContext::new(), true, stdout, stderr)
}

fn run_with_context<I, W, E>(
    args: I,
    ctx: &JobContext,
    watch_signals: bool,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, stdout, stderr),
    };
    match execute(cli, ctx, watch_signals, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(stderr, "{error}").ok();
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(
    cli: Cli,
    ctx: &JobContext,
    watch_signals: bool,
    stdout: &mut W,
) -> Result<(), AppError> {
    cli.config.validate()?;
    telemetry::initialise(&cli.config)?;
    match cli.command {
        CliCommand::RunPlugin(args) => {
            if watch_signals {
                run_plugin::watch_signals(ctx)?;
            }
            run_plugin::run_plugin(&cli.config, args, ctx, stdout)
        }
    }
}

/// Help and version go to stdout and succeed; usage errors go to stderr.
fn report_usage<W: Write, E: Write>(error: &clap::Error, stdout: &mut W, stderr: &mut E) -> ExitCode {
    let rendered = error.render();
    if error.use_stderr() {
        write!(stderr, "{rendered}").ok();
        u8::try_from(error.exit_code()).map_or(ExitCode::FAILURE, ExitCode::from)
    } else {
        write!(stdout, "{rendered}").ok();
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests;
