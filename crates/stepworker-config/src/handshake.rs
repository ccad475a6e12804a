//! Timing knobs for the plugin readiness handshake.

use std::time::Duration;

use crate::defaults::{
    DEFAULT_HANDSHAKE_GRACE_MS, DEFAULT_HANDSHAKE_POLL_MS, DEFAULT_HANDSHAKE_RETRY_MS,
    DEFAULT_HANDSHAKE_WINDOW_MS,
};

/// Timing applied while waiting for a plugin to announce its endpoint.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stepworker_config::HandshakeSettings;
///
/// let settings = HandshakeSettings::default().with_window(Duration::from_secs(1));
/// assert_eq!(settings.window(), Duration::from_secs(1));
/// assert_eq!(settings.grace(), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeSettings {
    grace: Duration,
    retry_delay: Duration,
    window: Duration,
    poll_interval: Duration,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(DEFAULT_HANDSHAKE_GRACE_MS),
            retry_delay: Duration::from_millis(DEFAULT_HANDSHAKE_RETRY_MS),
            window: Duration::from_millis(DEFAULT_HANDSHAKE_WINDOW_MS),
            poll_interval: Duration::from_millis(DEFAULT_HANDSHAKE_POLL_MS),
        }
    }
}

impl HandshakeSettings {
    /// Overrides the grace delay applied once after spawn.
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Overrides the delay between attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Overrides the window in which the readiness line must appear.
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Overrides how long a single read waits for the next byte.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Delay applied once after spawn.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Delay between attempts once output has run dry.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Window in which the readiness line must appear.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Time a single read waits for the next byte.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
