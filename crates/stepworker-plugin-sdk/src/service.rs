//! Trait implemented by plugin step logic.

use serde_json::Value;

use crate::rpc::{RpcError, ServiceDescriptor};

/// Step logic exposed by a plugin over its endpoint.
///
/// The dispatcher only routes methods listed in
/// [`ServiceDescriptor::operations`]; reflection methods are answered by the
/// dispatcher itself and never reach the service.
///
/// # Example
///
/// ```
/// use serde_json::Value;
/// use stepworker_plugin_sdk::{PluginService, RpcError, ServiceDescriptor};
///
/// struct Ping;
///
/// impl PluginService for Ping {
///     fn descriptor(&self) -> ServiceDescriptor {
///         ServiceDescriptor::new("ping", ["ping"])
///     }
///
///     fn call(&self, _method: &str, _params: Value) -> Result<Value, RpcError> {
///         Ok(Value::String(String::from("pong")))
///     }
/// }
/// ```
pub trait PluginService: Send + Sync + 'static {
    /// Describes the service for routing and reflection.
    fn descriptor(&self) -> ServiceDescriptor;

    /// Handles one call to a declared operation.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] that is relayed verbatim to the caller.
    fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}
