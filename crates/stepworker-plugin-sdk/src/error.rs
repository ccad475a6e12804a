//! Errors raised by the plugin server and client.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::rpc::RpcError;

/// Failures of the plugin-side bootstrap.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The endpoint could not be bound.
    #[error("failed to bind plugin endpoint {path}: {source}")]
    BindFailed {
        /// Endpoint path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The listener could not be configured or polled.
    #[error("plugin endpoint {path} failed: {source}")]
    Io {
        /// Endpoint path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The readiness line could not be written to stdout.
    #[error("failed to announce plugin endpoint {path}: {source}")]
    Announce {
        /// Endpoint path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The accept loop thread panicked.
    #[error("plugin accept loop panicked")]
    ThreadPanic,
}

/// Failures of a worker-side client talking to a plugin.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connecting to the endpoint failed.
    #[error("failed to connect to plugin endpoint {path}: {source}")]
    Connect {
        /// Endpoint path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading from or writing to the connection failed.
    #[error("I/O error on plugin endpoint {path}: {source}")]
    Io {
        /// Endpoint path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A message could not be encoded or decoded.
    #[error("invalid message on plugin endpoint: {0}")]
    Codec(#[from] serde_json::Error),

    /// The plugin answered with an error.
    #[error("plugin rejected '{method}': {source}")]
    Remote {
        /// Method that failed.
        method: String,
        /// Error reported by the plugin.
        #[source]
        source: RpcError,
    },

    /// The plugin closed the connection before answering.
    #[error("plugin endpoint {path} closed the connection")]
    Closed {
        /// Endpoint path.
        path: PathBuf,
    },

    /// The response did not answer the request that was sent.
    #[error("expected response to request {expected}, got {received}")]
    MismatchedId {
        /// Identifier that was sent.
        expected: u64,
        /// Identifier that came back.
        received: u64,
    },
}
