//! Human-facing plugin documentation.
//!
//! Plugins may attach a [`PluginInfo`] to their service descriptor. The
//! dispatcher serves it as markdown through the `reflection.info` method so
//! job tooling can render parameter help without knowing the plugin.

use serde::{Deserialize, Serialize};

/// Prefix stripped from plugin names when building documentation links.
const PLUGIN_NAME_PREFIX: &str = "plugin-";

/// Describes a single plugin parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginParameter {
    name: String,
    description: String,
}

impl PluginParameter {
    /// Creates a parameter description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Parameter name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Parameter description.
    #[must_use]
    pub const fn description(&self) -> &str {
        self.description.as_str()
    }
}

/// Documentation for a plugin.
///
/// # Example
///
/// ```
/// use stepworker_plugin_sdk::{PluginInfo, PluginParameter};
///
/// let info = PluginInfo::new("plugin-archive", "Archives the workspace.")
///     .with_parameter(PluginParameter::new("path", "Directory to archive"))
///     .with_documentation_base("https://docs.example.org/plugins");
/// let markdown = info.markdown();
/// assert!(markdown.contains("* **path**: Directory to archive"));
/// assert!(markdown.contains("https://docs.example.org/plugins/archive/README.md"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    name: String,
    description: String,
    #[serde(default)]
    parameters: Vec<PluginParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    documentation_base: Option<String>,
}

impl PluginInfo {
    /// Creates documentation with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            documentation_base: None,
        }
    }

    /// Appends a parameter description.
    #[must_use]
    pub fn with_parameter(mut self, parameter: PluginParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Sets the base URL under which per-plugin READMEs live.
    #[must_use]
    pub fn with_documentation_base(mut self, base: impl Into<String>) -> Self {
        self.documentation_base = Some(base.into());
        self
    }

    /// Plugin name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Declared parameters.
    #[must_use]
    pub fn parameters(&self) -> &[PluginParameter] {
        &self.parameters
    }

    /// Renders the documentation as markdown.
    #[must_use]
    pub fn markdown(&self) -> String {
        let parameters: String = self
            .parameters
            .iter()
            .map(|parameter| format!("* **{}**: {}\n", parameter.name, parameter.description))
            .collect();

        let more = self.documentation_base.as_deref().map_or_else(String::new, |base| {
            let short = self
                .name
                .strip_prefix(PLUGIN_NAME_PREFIX)
                .unwrap_or(&self.name);
            format!(
                "## More\n\nMore documentation on [{short}]({}/{short}/README.md)\n",
                base.trim_end_matches('/')
            )
        });

        format!(
            "\n{}\n\n## Parameters\n\n{parameters}\n{more}",
            self.description
        )
    }
}
