//! Shared configuration for the stepworker binaries and libraries.
//!
//! [`Config`] is parsed by `clap` from command-line flags, each of which can
//! also be supplied through a `STEPWORKER_*` environment variable. Those
//! variables sit under the reserved orchestration prefix, so they are never
//! forwarded to plugin processes.

mod defaults;
mod handshake;
mod logging;

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Args;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::defaults::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_HANDSHAKE_GRACE_MS, DEFAULT_HANDSHAKE_POLL_MS, DEFAULT_HANDSHAKE_RETRY_MS,
    DEFAULT_HANDSHAKE_WINDOW_MS, DEFAULT_LOG_FILTER, DEFAULT_RESERVED_ENV_PREFIX,
    DEFAULT_TERMINATION_GRACE_MS, default_base_dir, default_log_filter, default_log_format,
};
pub use self::handshake::HandshakeSettings;
pub use self::logging::{LogFormat, LogFormatParseError};

/// Worker configuration shared by the CLI and embedding callers.
#[derive(Debug, Clone, PartialEq, Eq, Args, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Tracing filter expression, for example `info` or `stepworker_plugins=debug`.
    #[arg(long, env = "STEPWORKER_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
    /// Log output format (`json` or `compact`).
    #[arg(long, env = "STEPWORKER_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
    /// Directory holding staged plugin artifacts and their entrypoints.
    #[arg(long, env = "STEPWORKER_BASE_DIR", default_value_t = default_base_dir())]
    pub base_dir: Utf8PathBuf,
    /// Environment variables with this prefix are withheld from plugins.
    #[arg(
        long,
        env = "STEPWORKER_RESERVED_ENV_PREFIX",
        default_value = DEFAULT_RESERVED_ENV_PREFIX
    )]
    pub reserved_env_prefix: String,
    /// Delay before the first read of a plugin's readiness line.
    #[arg(
        long,
        env = "STEPWORKER_HANDSHAKE_GRACE_MS",
        default_value_t = DEFAULT_HANDSHAKE_GRACE_MS
    )]
    pub handshake_grace_ms: u64,
    /// Delay between readiness read attempts.
    #[arg(
        long,
        env = "STEPWORKER_HANDSHAKE_RETRY_MS",
        default_value_t = DEFAULT_HANDSHAKE_RETRY_MS
    )]
    pub handshake_retry_ms: u64,
    /// Window in which a plugin must announce readiness.
    #[arg(
        long,
        env = "STEPWORKER_HANDSHAKE_WINDOW_MS",
        default_value_t = DEFAULT_HANDSHAKE_WINDOW_MS
    )]
    pub handshake_window_ms: u64,
    /// Time a single readiness read waits for the next byte.
    #[arg(
        long,
        env = "STEPWORKER_HANDSHAKE_POLL_MS",
        default_value_t = DEFAULT_HANDSHAKE_POLL_MS
    )]
    pub handshake_poll_ms: u64,
    /// Time a plugin gets to exit after SIGTERM before it is killed.
    #[arg(
        long,
        env = "STEPWORKER_TERMINATION_GRACE_MS",
        default_value_t = DEFAULT_TERMINATION_GRACE_MS
    )]
    pub termination_grace_ms: u64,
    /// Longest a single plugin call may block on a read or write.
    #[arg(
        long,
        env = "STEPWORKER_CALL_TIMEOUT_MS",
        default_value_t = DEFAULT_CALL_TIMEOUT_MS
    )]
    pub call_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: default_log_format(),
            base_dir: default_base_dir(),
            reserved_env_prefix: DEFAULT_RESERVED_ENV_PREFIX.to_owned(),
            handshake_grace_ms: DEFAULT_HANDSHAKE_GRACE_MS,
            handshake_retry_ms: DEFAULT_HANDSHAKE_RETRY_MS,
            handshake_window_ms: DEFAULT_HANDSHAKE_WINDOW_MS,
            handshake_poll_ms: DEFAULT_HANDSHAKE_POLL_MS,
            termination_grace_ms: DEFAULT_TERMINATION_GRACE_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Returns the configured tracing filter expression.
    #[must_use]
    pub const fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the base directory holding plugin artifacts.
    #[must_use]
    pub const fn base_dir(&self) -> &Utf8PathBuf {
        &self.base_dir
    }

    /// Returns the reserved environment prefix.
    #[must_use]
    pub const fn reserved_env_prefix(&self) -> &str {
        self.reserved_env_prefix.as_str()
    }

    /// Builds the handshake timing from the millisecond fields.
    #[must_use]
    pub fn handshake(&self) -> HandshakeSettings {
        HandshakeSettings::default()
            .with_grace(Duration::from_millis(self.handshake_grace_ms))
            .with_retry_delay(Duration::from_millis(self.handshake_retry_ms))
            .with_window(Duration::from_millis(self.handshake_window_ms))
            .with_poll_interval(Duration::from_millis(self.handshake_poll_ms))
    }

    /// Returns the grace period granted to plugins after SIGTERM.
    #[must_use]
    pub const fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Returns the bound on a single plugin call's socket reads and writes.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Rejects configurations the supervisor cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the reserved prefix is blank, or when the
    /// handshake window, poll interval or call timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reserved_env_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyReservedPrefix);
        }
        if self.handshake_window_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "handshake_window_ms",
            });
        }
        if self.handshake_poll_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "handshake_poll_ms",
            });
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "call_timeout_ms",
            });
        }
        Ok(())
    }
}

/// Errors raised while validating a [`Config`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A blank prefix would reserve nothing, forwarding every variable to
    /// plugins.
    #[error("the reserved environment prefix must not be empty")]
    EmptyReservedPrefix,
    /// A duration that must be positive was zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending field.
        field: &'static str,
    },
}

#[cfg(test)]
mod tests;
