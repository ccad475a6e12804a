//! Worker-side JSONL client for a hosted plugin endpoint.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::ClientError;
use crate::rpc::{DESCRIBE_METHOD, INFO_METHOD, RpcRequest, RpcResponse, ServiceDescriptor};

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// Connection to a plugin endpoint issuing one call at a time.
#[derive(Debug)]
pub struct PluginClient {
    endpoint: PathBuf,
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    next_id: u64,
}

impl PluginClient {
    /// Connects to the endpoint at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] when the socket cannot be opened.
    pub fn connect(endpoint: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = endpoint.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path).map_err(|source| ClientError::Connect {
            path: path.clone(),
            source: Arc::new(source),
        })?;
        let writer = stream.try_clone().map_err(|source| ClientError::Io {
            path: path.clone(),
            source: Arc::new(source),
        })?;
        debug!(target: CLIENT_TARGET, endpoint = %path.display(), "connected to plugin");
        Ok(Self {
            endpoint: path,
            reader: BufReader::new(stream),
            writer,
            next_id: 1,
        })
    }

    /// Endpoint this client is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Bounds how long a single read or write may block.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] when the socket rejects the timeout.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.writer
            .set_read_timeout(timeout)
            .and_then(|()| self.writer.set_write_timeout(timeout))
            .map_err(|source| self.io_error(source))
    }

    /// Invokes `method` and returns its result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] when the plugin reports an error,
    /// [`ClientError::Closed`] when the connection ends before a response,
    /// and transport errors otherwise.
    pub fn call(&mut self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let request = RpcRequest::new(id, method, params);

        let mut encoded = serde_json::to_vec(&request)?;
        encoded.push(b'\n');
        self.writer
            .write_all(&encoded)
            .and_then(|()| self.writer.flush())
            .map_err(|source| self.io_error(source))?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|source| self.io_error(source))?;
        if read == 0 {
            return Err(ClientError::Closed {
                path: self.endpoint.clone(),
            });
        }
        let response: RpcResponse = serde_json::from_str(&line)?;
        if response.id() != id && response.error().is_none() {
            return Err(ClientError::MismatchedId {
                expected: id,
                received: response.id(),
            });
        }
        response.into_result().map_err(|source| ClientError::Remote {
            method: method.to_owned(),
            source,
        })
    }

    /// Invokes `method` with typed parameters and decodes a typed result.
    ///
    /// # Errors
    ///
    /// As [`PluginClient::call`], plus [`ClientError::Codec`] when either side
    /// fails to (de)serialise.
    pub fn call_as<P, R>(&mut self, method: &str, params: &P) -> Result<R, ClientError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self.call(method, serde_json::to_value(params)?)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetches the plugin's service descriptor.
    ///
    /// # Errors
    ///
    /// As [`PluginClient::call_as`].
    pub fn describe(&mut self) -> Result<ServiceDescriptor, ClientError> {
        self.call_as(DESCRIBE_METHOD, &Value::Null)
    }

    /// Fetches the plugin's rendered Markdown documentation.
    ///
    /// # Errors
    ///
    /// As [`PluginClient::call_as`].
    pub fn info(&mut self) -> Result<String, ClientError> {
        self.call_as(INFO_METHOD, &Value::Null)
    }

    fn io_error(&self, source: std::io::Error) -> ClientError {
        ClientError::Io {
            path: self.endpoint.clone(),
            source: Arc::new(source),
        }
    }
}
