//! Default values shared by the worker binary and embedding callers.

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable prefix reserved for worker orchestration.
///
/// Variables carrying this prefix are never forwarded to plugin processes.
pub const DEFAULT_RESERVED_ENV_PREFIX: &str = "STEPWORKER_";

/// Delay applied once after spawning before the first handshake read.
pub const DEFAULT_HANDSHAKE_GRACE_MS: u64 = 500;

/// Delay between handshake attempts after the output ran dry.
pub const DEFAULT_HANDSHAKE_RETRY_MS: u64 = 500;

/// Window, measured from the end of the grace delay, in which the readiness
/// line must appear.
pub const DEFAULT_HANDSHAKE_WINDOW_MS: u64 = 5_000;

/// How long a single handshake read waits for the next byte.
pub const DEFAULT_HANDSHAKE_POLL_MS: u64 = 50;

/// Time a plugin gets to exit after SIGTERM before it is killed.
pub const DEFAULT_TERMINATION_GRACE_MS: u64 = 2_000;

/// Longest a single plugin call may block on its socket.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default base directory holding staged plugin artifacts.
///
/// Falls back to the current directory when it cannot be represented as
/// UTF-8.
#[must_use]
pub fn default_base_dir() -> Utf8PathBuf {
    std::env::current_dir()
        .ok()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}
