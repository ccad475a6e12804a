//! Command resolution for plugin executables.
//!
//! Resolution order: the command as given (an existing executable path, or a
//! bare name found on `PATH`), then `<base_dir>/<cmd>`. Nothing is spawned
//! when neither resolves.

use std::env;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::PluginError;

const COMMAND_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::command");

/// Resolves `cmd` against the worker's `PATH` and then `base_dir`.
///
/// # Errors
///
/// Returns [`PluginError::ExecutableNotFound`] when neither location holds an
/// executable file.
pub fn resolve_command(name: &str, cmd: &str, base_dir: &Path) -> Result<PathBuf, PluginError> {
    resolve_command_in(name, cmd, base_dir, env::var_os("PATH").as_deref())
}

/// Resolves `cmd` against an explicit `PATH` value and then `base_dir`.
///
/// # Errors
///
/// As [`resolve_command`].
pub fn resolve_command_in(
    name: &str,
    cmd: &str,
    base_dir: &Path,
    path_var: Option<&OsStr>,
) -> Result<PathBuf, PluginError> {
    if let Some(found) = lookup(cmd, path_var) {
        debug!(
            target: COMMAND_TARGET,
            plugin = name,
            command = %found.display(),
            "command resolved on PATH"
        );
        return Ok(found);
    }

    let staged = base_dir.join(cmd);
    if is_executable(&staged) {
        debug!(
            target: COMMAND_TARGET,
            plugin = name,
            command = %staged.display(),
            "command resolved in base directory"
        );
        return Ok(staged);
    }

    warn!(
        target: COMMAND_TARGET,
        plugin = name,
        command = cmd,
        base_dir = %base_dir.display(),
        "plugin executable not found"
    );
    Err(PluginError::ExecutableNotFound {
        name: name.to_owned(),
        command: cmd.to_owned(),
        base_dir: base_dir.to_path_buf(),
    })
}

/// Mirrors shell lookup: names containing a separator are used as paths,
/// bare names are searched on `PATH`.
fn lookup(cmd: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if cmd.is_empty() {
        return None;
    }
    if cmd.contains('/') {
        let candidate = PathBuf::from(cmd);
        return is_executable(&candidate).then_some(candidate);
    }
    env::split_paths(path_var?)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}
