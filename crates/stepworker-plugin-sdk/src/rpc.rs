//! JSONL wire types exchanged over a plugin endpoint.
//!
//! Every message is a single JSON object terminated by a newline. A client
//! writes an [`RpcRequest`]; the plugin answers with an [`RpcResponse`]
//! carrying the same `id` and either a `result` or an `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::info::PluginInfo;

/// Method answered by the dispatcher with the [`ServiceDescriptor`].
pub const DESCRIBE_METHOD: &str = "reflection.describe";

/// Method answered by the dispatcher with the plugin's markdown documentation.
pub const INFO_METHOD: &str = "reflection.info";

/// Request line sent by a client.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use stepworker_plugin_sdk::rpc::RpcRequest;
///
/// let request = RpcRequest::new(7, "echo", json!({"text": "hi"}));
/// let line = serde_json::to_string(&request).expect("serialise");
/// assert_eq!(line, r#"{"id":7,"method":"echo","params":{"text":"hi"}}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

impl RpcRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Correlation identifier echoed by the response.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Method name.
    #[must_use]
    pub const fn method(&self) -> &str {
        self.method.as_str()
    }

    /// Method parameters, `null` when omitted.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Consumes the request, returning its identifier, method, and parameters.
    #[must_use]
    pub fn into_parts(self) -> (u64, String, Value) {
        (self.id, self.method, self.params)
    }
}

/// Response line written by the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl RpcResponse {
    /// Creates a successful response.
    #[must_use]
    pub const fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates a failed response.
    #[must_use]
    pub const fn failure(id: u64, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Correlation identifier of the answered request.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Error payload, if the call failed.
    #[must_use]
    pub const fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    /// Converts the response into the call outcome.
    ///
    /// A response without `result` (or with `"result": null`) yields
    /// [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns the carried [`RpcError`] when the call failed.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Structured failure returned by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    /// The request line was not valid JSON or did not match the schema.
    pub const PARSE_ERROR: i64 = -32_700;
    /// The method is not exposed by the service.
    pub const METHOD_NOT_FOUND: i64 = -32_601;
    /// The parameters were rejected by the service.
    pub const INVALID_PARAMS: i64 = -32_602;
    /// The service failed while handling the call.
    pub const SERVICE_FAILURE: i64 = -32_000;

    /// Creates an error with an explicit code.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Request could not be parsed.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, message)
    }

    /// Method is unknown to the service.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("unknown method '{method}'"))
    }

    /// Parameters were rejected.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    /// Service failed while handling the call.
    #[must_use]
    pub fn service_failure(message: impl Into<String>) -> Self {
        Self::new(Self::SERVICE_FAILURE, message)
    }

    /// Numeric error code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        self.code
    }

    /// Human-readable message.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Reflection payload describing what a plugin service exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    name: String,
    operations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info: Option<PluginInfo>,
}

impl ServiceDescriptor {
    /// Creates a descriptor for `name` exposing `operations`.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            operations: operations.into_iter().map(Into::into).collect(),
            info: None,
        }
    }

    /// Attaches human-facing plugin documentation.
    #[must_use]
    pub fn with_info(mut self, info: PluginInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Service name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Operations callable over the endpoint.
    #[must_use]
    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    /// Returns `true` when `method` is one of the declared operations.
    #[must_use]
    pub fn exposes(&self, method: &str) -> bool {
        self.operations.iter().any(|operation| operation == method)
    }

    /// Plugin documentation, when provided.
    #[must_use]
    pub const fn info(&self) -> Option<&PluginInfo> {
        self.info.as_ref()
    }
}
