//! Archive unpack step run before entrypoint resolution.
//!
//! The staged artifact `<base_dir>/<plugin name>` is sniffed: gzip data is
//! decompressed and untarred, a bare tar is untarred, anything else is left
//! alone and assumed to be directly executable.

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::PluginError;

const UNPACK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::unpack");

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// Failures while reading or extracting an artifact.
#[derive(Debug, Error)]
pub enum UnpackError {
    /// The artifact or an archive entry could not be read or written.
    #[error("{0}")]
    Io(#[source] Arc<io::Error>),

    /// An entry would be written outside the destination directory.
    #[error("archive entry '{}' escapes the destination directory", .path.display())]
    UnsafeEntry {
        /// Offending entry path.
        path: PathBuf,
    },
}

impl From<io::Error> for UnpackError {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

/// Result of the unpack step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackOutcome {
    /// The artifact is not an archive; nothing was extracted.
    NotArchive,
    /// Entries were extracted into the destination.
    Extracted {
        /// Number of entries written.
        entries: usize,
    },
}

/// Returns `true` when `bytes` start with the gzip magic number.
#[must_use]
pub fn looks_like_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Returns `true` when `bytes` carry the POSIX/GNU tar magic at offset 257.
#[must_use]
pub fn looks_like_tar(bytes: &[u8]) -> bool {
    bytes
        .get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len())
        .is_some_and(|magic| magic == TAR_MAGIC)
}

/// Extracts `bytes` into `dir` when they form a (possibly gzipped) tar.
///
/// Existing files are overwritten and file modes are preserved.
///
/// # Errors
///
/// Returns [`UnpackError::UnsafeEntry`] for absolute or parent-relative
/// entries, and [`UnpackError::Io`] for corrupt archives or write failures.
pub fn unpack_into(dir: &Path, bytes: &[u8]) -> Result<UnpackOutcome, UnpackError> {
    if looks_like_gzip(bytes) {
        let mut tarball = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut tarball)?;
        return extract(dir, &tarball).map(|entries| UnpackOutcome::Extracted { entries });
    }
    if looks_like_tar(bytes) {
        return extract(dir, bytes).map(|entries| UnpackOutcome::Extracted { entries });
    }
    Ok(UnpackOutcome::NotArchive)
}

/// Unpacks the staged artifact of plugin `name` into `base_dir`.
///
/// # Errors
///
/// Returns [`PluginError::UnpackFailed`] when the artifact cannot be read or
/// extracted.
pub fn unpack_artifact(name: &str, base_dir: &Path) -> Result<UnpackOutcome, PluginError> {
    let artifact = base_dir.join(name);
    let outcome = fs::read(&artifact)
        .map_err(UnpackError::from)
        .and_then(|bytes| unpack_into(base_dir, &bytes));
    match outcome {
        Ok(UnpackOutcome::NotArchive) => {
            debug!(
                target: UNPACK_TARGET,
                plugin = name,
                artifact = %artifact.display(),
                "artifact is not an archive"
            );
            Ok(UnpackOutcome::NotArchive)
        }
        Ok(extracted) => {
            info!(
                target: UNPACK_TARGET,
                plugin = name,
                artifact = %artifact.display(),
                outcome = ?extracted,
                "unpacked plugin archive"
            );
            Ok(extracted)
        }
        Err(source) => {
            warn!(
                target: UNPACK_TARGET,
                plugin = name,
                artifact = %artifact.display(),
                error = %source,
                "failed to unpack plugin artifact"
            );
            Err(PluginError::UnpackFailed {
                name: name.to_owned(),
                path: artifact,
                source,
            })
        }
    }
}

fn extract(dir: &Path, tarball: &[u8]) -> Result<usize, UnpackError> {
    let mut archive = Archive::new(Cursor::new(tarball));
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);

    let mut entries = 0;
    for next in archive.entries()? {
        let mut entry = next?;
        let path = entry.path()?.into_owned();
        if !is_contained(&path) {
            return Err(UnpackError::UnsafeEntry { path });
        }
        entry.unpack_in(dir)?;
        entries += 1;
    }
    Ok(entries)
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
