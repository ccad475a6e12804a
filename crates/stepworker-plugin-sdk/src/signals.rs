//! Bridges process termination signals onto a [`JobContext`].

use std::io;
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use crate::context::JobContext;

const SIGNALS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signals");

/// Cancels `ctx` when the process receives `SIGTERM`, `SIGINT`, `SIGQUIT`,
/// or `SIGHUP`.
///
/// The handlers stay installed for the life of the process; the watcher
/// thread exits after the first signal.
///
/// # Errors
///
/// Returns the I/O error raised while installing the handlers.
pub fn cancel_on_termination(ctx: &JobContext) -> io::Result<()> {
    let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])?;
    let watched = ctx.clone();
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(target: SIGNALS_TARGET, signal, "termination signal received");
            watched.cancel();
        }
    });
    Ok(())
}
