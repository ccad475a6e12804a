//! Worker side of the readiness handshake.
//!
//! [`HandshakeReader`] consumes its own [`OutputView`] and feeds a
//! [`ReadinessScanner`] until the readiness line appears. When the child goes
//! quiet for a poll interval the partial line is discarded and, while the
//! window since spawn is still open, the reader waits the retry delay and
//! tries again.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::select;
use stepworker_config::HandshakeSettings;
use stepworker_plugin_sdk::{JobContext, ReadinessError, ReadinessScanner};
use thiserror::Error;
use tracing::{debug, trace};

use crate::capture::OutputView;

const HANDSHAKE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handshake");

/// Reasons the handshake ended without an endpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The window elapsed without a readiness line.
    #[error("no readiness line after {}ms", .elapsed.as_millis())]
    Timeout {
        /// Time since spawn.
        elapsed: Duration,
    },

    /// The child closed both output streams before announcing.
    #[error("plugin output closed before the readiness line")]
    StreamClosed,

    /// The job context was cancelled.
    #[error("handshake cancelled")]
    Cancelled,

    /// The readiness line was malformed.
    #[error(transparent)]
    Protocol(#[from] ReadinessError),
}

/// Waits for a plugin's readiness line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandshakeReader {
    settings: HandshakeSettings,
}

impl HandshakeReader {
    /// Creates a reader with the given timing.
    #[must_use]
    pub const fn new(settings: HandshakeSettings) -> Self {
        Self { settings }
    }

    /// Timing in effect.
    #[must_use]
    pub const fn settings(&self) -> &HandshakeSettings {
        &self.settings
    }

    /// Waits for the endpoint, measuring the window from now.
    ///
    /// # Errors
    ///
    /// See [`HandshakeReader::wait_since`].
    pub fn wait_for_endpoint(
        &self,
        view: &OutputView,
        ctx: &JobContext,
    ) -> Result<PathBuf, HandshakeError> {
        self.wait_since(view, ctx, Instant::now())
    }

    /// Waits for the endpoint, measuring the window from `spawned_at`.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Timeout`] once the window has elapsed,
    /// [`HandshakeError::StreamClosed`] when the output ends first,
    /// [`HandshakeError::Cancelled`] when `ctx` is cancelled, and
    /// [`HandshakeError::Protocol`] for an empty address.
    pub fn wait_since(
        &self,
        view: &OutputView,
        ctx: &JobContext,
        spawned_at: Instant,
    ) -> Result<PathBuf, HandshakeError> {
        if ctx.wait_timeout(self.settings.grace()) {
            return Err(HandshakeError::Cancelled);
        }

        let mut scanner = ReadinessScanner::new();
        loop {
            select! {
                recv(view.receiver()) -> message => {
                    let Ok(chunk) = message else {
                        debug!(target: HANDSHAKE_TARGET, "plugin output closed during handshake");
                        return Err(HandshakeError::StreamClosed);
                    };
                    if let Some(result) = chunk.iter().find_map(|byte| scanner.push(*byte)) {
                        return result.map_err(HandshakeError::from);
                    }
                    self.check_window(spawned_at)?;
                }
                recv(ctx.done()) -> _ => return Err(HandshakeError::Cancelled),
                default(self.settings.poll_interval()) => {
                    if !scanner.is_empty() {
                        trace!(
                            target: HANDSHAKE_TARGET,
                            discarded = scanner.pending(),
                            "discarding partial readiness line"
                        );
                    }
                    scanner.reset();
                    self.check_window(spawned_at)?;
                    if ctx.wait_timeout(self.settings.retry_delay()) {
                        return Err(HandshakeError::Cancelled);
                    }
                }
            }
        }
    }

    fn check_window(&self, spawned_at: Instant) -> Result<(), HandshakeError> {
        let elapsed = spawned_at.elapsed();
        if elapsed >= self.settings.window() {
            return Err(HandshakeError::Timeout { elapsed });
        }
        Ok(())
    }
}
