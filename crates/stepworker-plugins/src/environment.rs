//! Environment handed to plugin processes.
//!
//! The worker's own environment is inherited minus every variable carrying
//! the reserved prefix, then caller overrides are appended. Later entries win
//! when applied to a `Command`.

use std::env;

/// Ordered set of variables for a plugin process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnEnvironment {
    vars: Vec<(String, String)>,
}

impl SpawnEnvironment {
    /// Builds the environment from an explicit inherited set.
    #[must_use]
    pub fn build<I, K, V>(inherited: I, reserved_prefix: &str, overrides: &[(String, String)]) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars: Vec<(String, String)> = inherited
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .filter(|(key, _)| reserved_prefix.is_empty() || !key.starts_with(reserved_prefix))
            .collect();
        vars.extend(overrides.iter().cloned());
        Self { vars }
    }

    /// Builds the environment from the current process environment.
    ///
    /// Variables whose name or value is not valid Unicode are not inherited.
    #[must_use]
    pub fn from_process(reserved_prefix: &str, overrides: &[(String, String)]) -> Self {
        let inherited = env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        });
        Self::build(inherited, reserved_prefix, overrides)
    }

    /// Effective value of `key`, honouring later-wins ordering.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Variables in application order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of entries, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` when no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
