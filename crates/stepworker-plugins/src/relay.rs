//! Background relay from captured plugin output to the job log.
//!
//! The relay forwards complete lines, newline included, as they arrive. A
//! closed stream is not an error; the relay keeps waiting for cancellation
//! of the job or of its own stop context.
//! On cancellation it drains whatever is already captured, flushes a final
//! partial line without its newline, and exits. Empty content is never
//! forwarded.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, never, select};
use stepworker_plugin_sdk::JobContext;
use tracing::{debug, info};

use crate::capture::OutputView;

const RELAY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::relay");

/// Destination for relayed plugin output.
pub trait LogSink: Send + Sync {
    /// Accepts one complete line or the final partial line.
    fn accept(&self, line: &str);
}

/// Sink that emits each line as a `tracing` event.
#[derive(Debug, Clone)]
pub struct TracingLogSink {
    plugin: String,
}

impl TracingLogSink {
    /// Creates a sink tagging events with `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }
}

impl LogSink for TracingLogSink {
    fn accept(&self, line: &str) {
        info!(
            target: RELAY_TARGET,
            plugin = %self.plugin,
            line = line.trim_end_matches('\n'),
            "plugin output"
        );
    }
}

/// Relay bound to one plugin's output view.
pub struct LogRelay {
    plugin: String,
    sink: Arc<dyn LogSink>,
    stop: Option<JobContext>,
}

impl std::fmt::Debug for LogRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRelay")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

impl LogRelay {
    /// Creates a relay for `plugin` writing to `sink`.
    #[must_use]
    pub fn new(plugin: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            plugin: plugin.into(),
            sink,
            stop: None,
        }
    }

    /// Also stops the relay once `stop` is cancelled.
    #[must_use]
    pub fn with_stop(mut self, stop: JobContext) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Starts the relay thread; it exits only after `ctx` or the stop
    /// context is cancelled.
    #[must_use]
    pub fn spawn(self, view: OutputView, ctx: JobContext) -> JoinHandle<()> {
        thread::spawn(move || self.run(&view, &ctx))
    }

    fn run(&self, view: &OutputView, ctx: &JobContext) {
        let stopped = self
            .stop
            .as_ref()
            .map_or_else(never, |stop| stop.done().clone());
        let mut line = Vec::new();
        loop {
            select! {
                recv(view.receiver()) -> message => match message {
                    Ok(chunk) => self.forward(&chunk, &mut line),
                    Err(_) => {
                        debug!(target: RELAY_TARGET, plugin = %self.plugin, "plugin output closed");
                        park(ctx, &stopped);
                        break;
                    }
                },
                recv(ctx.done()) -> _ => break,
                recv(stopped) -> _ => break,
            }
        }

        self.forward(&view.drain(), &mut line);
        if !line.is_empty() {
            self.sink.accept(&String::from_utf8_lossy(&line));
        }
        debug!(target: RELAY_TARGET, plugin = %self.plugin, "log relay stopped");
    }

    fn forward(&self, chunk: &[u8], line: &mut Vec<u8>) {
        for byte in chunk {
            line.push(*byte);
            if *byte == b'\n' {
                self.sink.accept(&String::from_utf8_lossy(line));
                line.clear();
            }
        }
    }
}

fn park(ctx: &JobContext, stopped: &Receiver<()>) {
    select! {
        recv(ctx.done()) -> _ => {}
        recv(stopped) -> _ => {}
    }
}
