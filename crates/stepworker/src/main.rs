//! CLI entrypoint for the stepworker plugin supervisor.
//!
//! The binary delegates to [`stepworker::run`], which parses arguments,
//! installs telemetry, and runs the requested command.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    stepworker::run(std::env::args_os(), &mut stdout, &mut stderr)
}
