//! Plugin-side SDK and shared protocol for stepworker plugins.
//!
//! A plugin is a standalone executable that hosts a [`PluginService`] over a
//! Unix domain socket. The worker launches it, waits for the readiness line
//! described in [`readiness`], and then talks JSONL RPC to it through a
//! [`PluginClient`].
//!
//! Plugin authors usually need only [`serve`]:
//!
//! ```no_run
//! use serde_json::Value;
//! use stepworker_plugin_sdk::{JobContext, PluginService, RpcError, ServiceDescriptor, serve};
//!
//! struct Ping;
//!
//! impl PluginService for Ping {
//!     fn descriptor(&self) -> ServiceDescriptor {
//!         ServiceDescriptor::new("ping", ["ping"])
//!     }
//!
//!     fn call(&self, _method: &str, _params: Value) -> Result<Value, RpcError> {
//!         Ok(Value::from("pong"))
//!     }
//! }
//!
//! let ctx = JobContext::new();
//! serve(Ping, &ctx)?;
//! # Ok::<(), stepworker_plugin_sdk::ServeError>(())
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod info;
pub mod readiness;
pub mod rpc;
pub mod server;
pub mod service;
pub mod signals;

pub use client::PluginClient;
pub use context::JobContext;
pub use error::{ClientError, ServeError};
pub use info::{PluginInfo, PluginParameter};
pub use readiness::{READY_SUFFIX, ReadinessError, ReadinessScanner};
pub use rpc::{RpcError, RpcRequest, RpcResponse, ServiceDescriptor};
pub use server::{PluginServer, ServerSettings, StopHandle, serve};
pub use service::PluginService;
pub use signals::cancel_on_termination;
