//! Plugin supervision for stepworker jobs.
//!
//! The `stepworker-plugins` crate starts plugin binaries on behalf of a job
//! and hands back a client connected to the socket each plugin serves. A
//! start resolves the plugin's [`PluginBinaryDescriptor`] for the current
//! [`Platform`], unpacks the staged artifact when it is a tarball, spawns the
//! command with a filtered environment, and waits for the readiness line
//! announcing the endpoint. The handshake reads the plugin's combined stdout
//! and stderr while the same output is relayed to the job log.
//!
//! # Architecture
//!
//! [`PluginSupervisor`] owns the processes. Each plugin name is started at
//! most once per supervisor; the shared [`PluginClientHandle`] lives in the
//! [`PluginClientRegistry`]. Child processes are tied to the job's
//! [`JobContext`](stepworker_plugin_sdk::JobContext): cancelling the job, or
//! shutting the supervisor down, sends SIGTERM and then SIGKILL after the
//! configured grace period.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use stepworker_plugin_sdk::JobContext;
//! use stepworker_plugins::{
//!     JsonFileMetadataProvider, PluginSupervisor, StartOptions, SupervisorSettings,
//! };
//!
//! let provider = Arc::new(JsonFileMetadataProvider::new("/srv/plugins/plugins.json"));
//! let supervisor = PluginSupervisor::new(SupervisorSettings::new("/srv/plugins"), provider);
//! let ctx = JobContext::new();
//!
//! let plugin = supervisor
//!     .start(&ctx, "tmpl", StartOptions::new().with_workdir("/work"))
//!     .expect("plugin starts");
//! let rendered = plugin.call("render", json!({"template": "main.tmpl"}));
//! ctx.cancel();
//! ```

pub mod capture;
pub mod command;
pub mod descriptor;
pub mod environment;
pub mod error;
pub mod handshake;
pub mod launcher;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod supervisor;
pub mod unpack;

#[cfg(test)]
mod tests;

pub use self::capture::{CaptureStats, CapturedOutput, OutputView};
pub use self::descriptor::{Platform, PluginBinaryDescriptor};
pub use self::environment::SpawnEnvironment;
pub use self::error::PluginError;
pub use self::handshake::{HandshakeError, HandshakeReader};
pub use self::launcher::{LaunchedProcess, OutputSink, SpawnSpec, launch};
pub use self::registry::{PluginClientHandle, PluginClientRegistry};
pub use self::relay::{LogRelay, LogSink, TracingLogSink};
pub use self::resolver::{
    JsonFileMetadataProvider, MetadataError, MetadataProvider, StaticMetadataProvider, resolve,
};
pub use self::supervisor::{PluginSupervisor, StartOptions, SupervisorSettings};
pub use self::unpack::{UnpackError, UnpackOutcome, unpack_artifact};
