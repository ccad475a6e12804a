//! Binary resolution: turn a plugin name into a descriptor.
//!
//! A descriptor supplied by the caller wins. Otherwise the configured
//! [`MetadataProvider`] is asked for the descriptor matching the plugin name
//! and the worker's [`Platform`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, warn};

use crate::descriptor::{Platform, PluginBinaryDescriptor};
use crate::error::PluginError;

const RESOLVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::resolver");

/// Failures reported by a metadata provider.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The descriptor file could not be read.
    #[error("failed to read plugin descriptors from {path}: {source}")]
    Read {
        /// Descriptor file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The descriptor file is not a JSON array of descriptors.
    #[error("invalid plugin descriptors in {path}: {source}")]
    Parse {
        /// Descriptor file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The provider's backing service failed.
    #[error("metadata provider failed: {message}")]
    Provider {
        /// Description of the failure.
        message: String,
    },
}

/// Source of plugin binary descriptors.
pub trait MetadataProvider: Send + Sync {
    /// Looks up the descriptor for `name` on `os`/`arch`.
    ///
    /// # Errors
    ///
    /// Returns a [`MetadataError`] when the lookup itself fails. An unknown
    /// plugin is `Ok(None)`.
    fn binary_info(
        &self,
        name: &str,
        os: &str,
        arch: &str,
    ) -> Result<Option<PluginBinaryDescriptor>, MetadataError>;
}

/// Provider serving a fixed, in-memory list of descriptors.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataProvider {
    descriptors: Vec<PluginBinaryDescriptor>,
}

impl StaticMetadataProvider {
    /// Creates a provider over `descriptors`.
    #[must_use]
    pub fn new(descriptors: impl IntoIterator<Item = PluginBinaryDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into_iter().collect(),
        }
    }
}

impl MetadataProvider for StaticMetadataProvider {
    fn binary_info(
        &self,
        name: &str,
        os: &str,
        arch: &str,
    ) -> Result<Option<PluginBinaryDescriptor>, MetadataError> {
        Ok(find(&self.descriptors, name, os, arch))
    }
}

/// Provider reading a JSON array of descriptors from disk on first use.
///
/// A read or parse failure is not cached, so a later lookup retries.
#[derive(Debug)]
pub struct JsonFileMetadataProvider {
    path: PathBuf,
    descriptors: OnceCell<Vec<PluginBinaryDescriptor>>,
}

impl JsonFileMetadataProvider {
    /// Creates a provider backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            descriptors: OnceCell::new(),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<&[PluginBinaryDescriptor], MetadataError> {
        self.descriptors
            .get_or_try_init(|| {
                let raw = fs::read(&self.path).map_err(|source| MetadataError::Read {
                    path: self.path.clone(),
                    source: Arc::new(source),
                })?;
                let descriptors: Vec<PluginBinaryDescriptor> = serde_json::from_slice(&raw)
                    .map_err(|source| MetadataError::Parse {
                        path: self.path.clone(),
                        source: Arc::new(source),
                    })?;
                debug!(
                    target: RESOLVER_TARGET,
                    path = %self.path.display(),
                    count = descriptors.len(),
                    "loaded plugin descriptors"
                );
                Ok(descriptors)
            })
            .map(Vec::as_slice)
    }
}

impl MetadataProvider for JsonFileMetadataProvider {
    fn binary_info(
        &self,
        name: &str,
        os: &str,
        arch: &str,
    ) -> Result<Option<PluginBinaryDescriptor>, MetadataError> {
        Ok(find(self.load()?, name, os, arch))
    }
}

fn find(
    descriptors: &[PluginBinaryDescriptor],
    name: &str,
    os: &str,
    arch: &str,
) -> Option<PluginBinaryDescriptor> {
    let platform = Platform::new(os, arch);
    descriptors
        .iter()
        .find(|descriptor| descriptor.matches(name, &platform))
        .cloned()
}

/// Returns the descriptor to launch `name` with.
///
/// # Errors
///
/// Returns [`PluginError::MetadataUnavailable`] when no descriptor was
/// provided and the provider fails or knows no matching binary.
pub fn resolve(
    provider: &dyn MetadataProvider,
    name: &str,
    platform: &Platform,
    provided: Option<PluginBinaryDescriptor>,
) -> Result<PluginBinaryDescriptor, PluginError> {
    if let Some(descriptor) = provided {
        debug!(target: RESOLVER_TARGET, plugin = name, "using provided descriptor");
        return Ok(descriptor);
    }
    match provider.binary_info(name, platform.os(), platform.arch()) {
        Ok(Some(descriptor)) => {
            debug!(
                target: RESOLVER_TARGET,
                plugin = name,
                cmd = descriptor.cmd(),
                "resolved plugin descriptor"
            );
            Ok(descriptor)
        }
        Ok(None) => {
            warn!(
                target: RESOLVER_TARGET,
                plugin = name,
                os = platform.os(),
                arch = platform.arch(),
                "no descriptor for plugin"
            );
            Err(PluginError::MetadataUnavailable {
                name: name.to_owned(),
                source: None,
            })
        }
        Err(error) => {
            warn!(target: RESOLVER_TARGET, plugin = name, error = %error, "metadata lookup failed");
            Err(PluginError::MetadataUnavailable {
                name: name.to_owned(),
                source: Some(error),
            })
        }
    }
}
