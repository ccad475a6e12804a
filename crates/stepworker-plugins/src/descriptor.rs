//! Binary descriptors and platform identification.

use serde::{Deserialize, Serialize};

/// Describes how to run one plugin binary on one platform.
///
/// # Example
///
/// ```
/// use stepworker_plugins::PluginBinaryDescriptor;
///
/// let descriptor = PluginBinaryDescriptor::new("tmpl", "linux", "x86_64", "tmpl")
///     .with_entrypoints(["main.tmpl"])
///     .with_args(["--verbose"]);
/// assert_eq!(descriptor.cmd(), "tmpl");
/// assert_eq!(descriptor.entrypoints(), ["main.tmpl"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginBinaryDescriptor {
    name: String,
    os: String,
    arch: String,
    cmd: String,
    #[serde(default)]
    entrypoints: Vec<String>,
    #[serde(default)]
    args: Vec<String>,
}

impl PluginBinaryDescriptor {
    /// Creates a descriptor without entrypoints or extra arguments.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
        cmd: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            os: os.into(),
            arch: arch.into(),
            cmd: cmd.into(),
            entrypoints: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Replaces the entrypoint path fragments.
    #[must_use]
    pub fn with_entrypoints<I, S>(mut self, entrypoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoints = entrypoints.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the extra arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Plugin name, also the artifact file name under the base directory.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target operating system.
    #[must_use]
    pub fn os(&self) -> &str {
        &self.os
    }

    /// Target architecture.
    #[must_use]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Command to execute.
    #[must_use]
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Path fragments resolved under the base directory, in order.
    #[must_use]
    pub fn entrypoints(&self) -> &[String] {
        &self.entrypoints
    }

    /// Extra arguments appended after the entrypoints.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns `true` when the descriptor targets `name` on `platform`.
    ///
    /// Operating system and architecture compare case-insensitively.
    #[must_use]
    pub fn matches(&self, name: &str, platform: &Platform) -> bool {
        self.name == name
            && self.os.eq_ignore_ascii_case(platform.os())
            && self.arch.eq_ignore_ascii_case(platform.arch())
    }
}

/// Lower-cased operating system and architecture pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    os: String,
    arch: String,
}

impl Platform {
    /// Builds a platform, lower-casing both parts.
    #[must_use]
    pub fn new(os: impl AsRef<str>, arch: impl AsRef<str>) -> Self {
        Self {
            os: os.as_ref().to_ascii_lowercase(),
            arch: arch.as_ref().to_ascii_lowercase(),
        }
    }

    /// Platform the worker is running on.
    #[must_use]
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Operating system.
    #[must_use]
    pub fn os(&self) -> &str {
        &self.os
    }

    /// Architecture.
    #[must_use]
    pub fn arch(&self) -> &str {
        &self.arch
    }
}
