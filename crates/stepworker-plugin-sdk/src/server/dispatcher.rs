//! Routes JSONL request lines to the hosted service.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;

use serde_json::Value;
use tracing::debug;

use crate::rpc::{DESCRIBE_METHOD, INFO_METHOD, RpcError, RpcRequest, RpcResponse};
use crate::rpc::ServiceDescriptor;
use crate::service::PluginService;

use super::SERVER_TARGET;

/// Maximum size of a single request line in bytes.
pub(crate) const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Identifier used when a response cannot be correlated with a request.
const UNCORRELATED_ID: u64 = 0;

/// Dispatcher owning the service and its cached descriptor.
pub(crate) struct Dispatcher {
    service: Box<dyn PluginService>,
    descriptor: ServiceDescriptor,
}

impl Dispatcher {
    pub(crate) fn new<S: PluginService>(service: S) -> Self {
        let descriptor = service.descriptor();
        Self {
            service: Box::new(service),
            descriptor,
        }
    }

    pub(crate) const fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Parses one raw line and dispatches it.
    pub(crate) fn dispatch_line(&self, line: &[u8]) -> RpcResponse {
        match serde_json::from_slice::<RpcRequest>(line.trim_ascii()) {
            Ok(request) => self.dispatch(request),
            Err(error) => {
                RpcResponse::failure(UNCORRELATED_ID, RpcError::parse_error(error.to_string()))
            }
        }
    }

    /// Routes a parsed request to reflection or to the service.
    pub(crate) fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let (id, method, params) = request.into_parts();
        debug!(target: SERVER_TARGET, id, method = %method, "dispatching call");
        match method.as_str() {
            DESCRIBE_METHOD => match serde_json::to_value(&self.descriptor) {
                Ok(value) => RpcResponse::success(id, value),
                Err(error) => {
                    RpcResponse::failure(id, RpcError::service_failure(error.to_string()))
                }
            },
            INFO_METHOD => match self.descriptor.info() {
                Some(info) => RpcResponse::success(id, Value::String(info.markdown())),
                None => RpcResponse::failure(id, RpcError::method_not_found(INFO_METHOD)),
            },
            name if self.descriptor.exposes(name) => match self.service.call(name, params) {
                Ok(value) => RpcResponse::success(id, value),
                Err(error) => RpcResponse::failure(id, error),
            },
            name => RpcResponse::failure(id, RpcError::method_not_found(name)),
        }
    }
}

/// Serves request lines on one connection until the peer disconnects.
pub(crate) fn serve_connection(stream: UnixStream, dispatcher: &Dispatcher) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let limit = u64::try_from(MAX_REQUEST_BYTES).unwrap_or(u64::MAX);

    loop {
        line.clear();
        let read = (&mut reader).take(limit + 1).read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(());
        }
        if line.len() > MAX_REQUEST_BYTES {
            let response = RpcResponse::failure(
                UNCORRELATED_ID,
                RpcError::parse_error("request exceeds maximum size"),
            );
            write_response(&mut writer, &response)?;
            return Ok(());
        }
        if line.trim_ascii().is_empty() {
            continue;
        }
        let response = dispatcher.dispatch_line(&line);
        write_response(&mut writer, &response)?;
    }
}

fn write_response(writer: &mut impl Write, response: &RpcResponse) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, response)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
