//! Client handles and the per-supervisor registry that caches them.
//!
//! The [`PluginClientRegistry`] maps plugin names to started plugins. The
//! first start for a name runs the start sequence while concurrent starts for
//! the same name wait for it and then share its handle. A failed start hands
//! the slot to a waiting caller, or leaves no entry behind when nobody waits.
//! Starts for different names only contend on the short map
//! lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde_json::Value;
use stepworker_plugin_sdk::{PluginClient, ServiceDescriptor};
use tracing::debug;

use crate::capture::CaptureStats;
use crate::error::PluginError;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Handle to a started plugin.
///
/// The RPC connection is opened on first use and reopened after a failed
/// call, so a handle outlives transient connection errors. A handle whose
/// process has died keeps failing its calls. With a call timeout set, a call
/// to a plugin that never answers fails once a socket read stalls that long.
#[derive(Debug)]
pub struct PluginClientHandle {
    name: String,
    endpoint: PathBuf,
    pid: u32,
    stats: CaptureStats,
    call_timeout: Option<Duration>,
    client: Mutex<Option<PluginClient>>,
}

impl PluginClientHandle {
    /// Creates a handle for a plugin that announced `endpoint`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<PathBuf>,
        pid: u32,
        stats: CaptureStats,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            pid,
            stats,
            call_timeout: None,
            client: Mutex::new(None),
        }
    }

    /// Bounds every socket read and write made by calls on this handle.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Announced endpoint address.
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Process id of the plugin.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Output capture statistics.
    #[must_use]
    pub const fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Opens a dedicated client connection to the plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Connect`] when the endpoint refuses the
    /// connection or rejects the call timeout.
    pub fn connect(&self) -> Result<PluginClient, PluginError> {
        PluginClient::connect(&self.endpoint)
            .and_then(|client| client.set_timeout(self.call_timeout).map(|()| client))
            .map_err(|source| PluginError::Connect {
                name: self.name.clone(),
                source: Box::new(source),
            })
    }

    /// Calls `method` over the shared connection.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Connect`] when no connection can be opened and
    /// [`PluginError::Rpc`] when the call fails.
    pub fn call(&self, method: &str, params: Value) -> Result<Value, PluginError> {
        let mut slot = self
            .client
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut client = match slot.take() {
            Some(open) => open,
            None => self.connect()?,
        };
        match client.call(method, params) {
            Ok(value) => {
                *slot = Some(client);
                Ok(value)
            }
            Err(source) => {
                debug!(
                    target: REGISTRY_TARGET,
                    plugin = %self.name,
                    method,
                    error = %source,
                    "plugin call failed, dropping connection"
                );
                Err(PluginError::Rpc {
                    name: self.name.clone(),
                    method: method.to_owned(),
                    source: Box::new(source),
                })
            }
        }
    }

    /// Fetches the plugin's service descriptor.
    ///
    /// # Errors
    ///
    /// As [`PluginClientHandle::call`], plus [`PluginError::ProtocolViolation`]
    /// when the descriptor cannot be decoded.
    pub fn describe(&self) -> Result<ServiceDescriptor, PluginError> {
        let value = self.call(stepworker_plugin_sdk::rpc::DESCRIBE_METHOD, Value::Null)?;
        serde_json::from_value(value).map_err(|error| PluginError::ProtocolViolation {
            name: self.name.clone(),
            message: format!("invalid service descriptor: {error}"),
        })
    }
}

type Slot = Arc<OnceCell<Arc<PluginClientHandle>>>;

/// Owned map from plugin name to started plugin.
#[derive(Debug, Default)]
pub struct PluginClientRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PluginClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `name`, running `start` if none exists yet.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `start`; no entry is recorded. A
    /// caller already waiting on the same name retries the start itself.
    pub fn get_or_start<F>(
        &self,
        name: &str,
        start: F,
    ) -> Result<Arc<PluginClientHandle>, PluginError>
    where
        F: FnOnce() -> Result<PluginClientHandle, PluginError>,
    {
        let slot = Arc::clone(self.lock().entry(name.to_owned()).or_default());
        if let Some(handle) = slot.get() {
            debug!(target: REGISTRY_TARGET, plugin = name, "reusing running plugin");
            return Ok(Arc::clone(handle));
        }

        let outcome = slot.get_or_try_init(|| start().map(Arc::new)).map(Arc::clone);
        if outcome.is_err() {
            self.forget_failed(name, &slot);
        }
        outcome
    }

    /// Returns the handle for `name` if the plugin has started.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<PluginClientHandle>> {
        self.lock()
            .get(name)
            .and_then(|slot| slot.get().map(Arc::clone))
    }

    /// Number of started plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.get().is_some()).count()
    }

    /// Returns `true` when no plugin has started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of started plugins, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Removes every started plugin, returning their handles.
    #[must_use]
    pub fn clear(&self) -> Vec<Arc<PluginClientHandle>> {
        let mut slots = self.lock();
        let started = slots
            .values()
            .filter_map(|slot| slot.get().map(Arc::clone))
            .collect();
        slots.retain(|_, slot| slot.get().is_none());
        started
    }

    /// Drops the empty `slot` for `name` unless another caller still holds
    /// it; a holder retries the start in that same slot.
    fn forget_failed(&self, name: &str, slot: &Slot) {
        let mut slots = self.lock();
        let unshared = slots.get(name).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && current.get().is_none() && Arc::strong_count(slot) == 2
        });
        if unshared {
            slots.remove(name);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
