//! Readiness handshake shared by the worker and hosted plugins.
//!
//! Once a plugin has opened its endpoint it writes exactly one line to
//! standard output:
//!
//! ```text
//! <endpoint-address> is ready to accept new connection\n
//! ```
//!
//! There is no other framing. The worker scans the plugin's combined output
//! for that suffix with a [`ReadinessScanner`], tolerating unrelated lines
//! written before the marker. The line format is bit-exact so existing plugin
//! binaries keep working.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Suffix that terminates the readiness line, newline included.
pub const READY_SUFFIX: &str = " is ready to accept new connection\n";

/// Formats the readiness line for `endpoint`.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use stepworker_plugin_sdk::readiness::readiness_line;
///
/// let line = readiness_line(Path::new("/tmp/p.sock"));
/// assert_eq!(line, "/tmp/p.sock is ready to accept new connection\n");
/// ```
#[must_use]
pub fn readiness_line(endpoint: &Path) -> String {
    format!("{}{READY_SUFFIX}", endpoint.display())
}

/// Writes the readiness line for `endpoint` and flushes the writer.
///
/// # Errors
///
/// Returns the underlying I/O error when writing or flushing fails.
pub fn announce<W: Write>(mut out: W, endpoint: &Path) -> io::Result<()> {
    out.write_all(readiness_line(endpoint).as_bytes())?;
    out.flush()
}

/// Violations of the readiness line format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadinessError {
    /// The marker appeared without an address in front of it.
    #[error("readiness marker carried an empty endpoint address")]
    EmptyAddress,
}

/// Incremental, byte-at-a-time detector for the readiness line.
///
/// Bytes are pushed one at a time. Completed lines that do not carry the
/// marker are discarded, so only the current line is ever buffered.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use stepworker_plugin_sdk::readiness::ReadinessScanner;
///
/// let mut scanner = ReadinessScanner::new();
/// let mut found = None;
/// for byte in b"booting\n/tmp/y.sock is ready to accept new connection\n" {
///     if let Some(result) = scanner.push(*byte) {
///         found = Some(result);
///         break;
///     }
/// }
/// assert_eq!(found, Some(Ok(PathBuf::from("/tmp/y.sock"))));
/// ```
#[derive(Debug, Default, Clone)]
pub struct ReadinessScanner {
    line: Vec<u8>,
}

impl ReadinessScanner {
    /// Creates an empty scanner.
    #[must_use]
    pub const fn new() -> Self {
        Self { line: Vec::new() }
    }

    /// Feeds one byte.
    ///
    /// Returns `None` until the marker completes. On completion the scanner
    /// is reset and the extracted, whitespace-trimmed address is returned.
    pub fn push(&mut self, byte: u8) -> Option<Result<PathBuf, ReadinessError>> {
        self.line.push(byte);
        if let Some(prefix) = self.line.strip_suffix(READY_SUFFIX.as_bytes()) {
            let address = String::from_utf8_lossy(prefix).trim().to_owned();
            self.reset();
            if address.is_empty() {
                return Some(Err(ReadinessError::EmptyAddress));
            }
            return Some(Ok(PathBuf::from(address)));
        }
        if byte == b'\n' {
            self.reset();
        }
        None
    }

    /// Discards any partially accumulated line.
    pub fn reset(&mut self) {
        self.line.clear();
    }

    /// Returns `true` when no partial line is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    /// Number of bytes buffered for the current line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.line.len()
    }
}
