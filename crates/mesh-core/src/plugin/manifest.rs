//! Plugin manifest definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PluginId;

/// Highest allowed manifest priority.
pub const MAX_PRIORITY: u8 = 5;

/// Manifest validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifestError {
    #[error("plugin manifest has an empty name")]
    EmptyName,

    #[error("plugin '{0}' has an empty version")]
    EmptyVersion(String),

    #[error("plugin '{name}' priority {priority} exceeds {max}", max = MAX_PRIORITY)]
    PriorityOutOfRange { name: String, priority: u8 },

    #[error("plugin '{0}' depends on itself")]
    SelfDependency(String),
}

/// Declares a plugin's identity and contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub plugin_id: PluginId,
    /// Registry key; unique within one registry.
    pub name: String,
    pub version: String,
    /// Pin the plugin to `version` when catalogs are reconciled.
    #[serde(default)]
    pub version_lock: bool,
    #[serde(default)]
    pub priority: u8,
    /// Names of plugins that must be registered before this one can run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "mesh".to_string()
}

impl PluginManifest {
    /// Create a manifest whose plugin id is `<namespace>/<name>@<version>`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        let namespace = default_namespace();
        Self {
            plugin_id: PluginId::new(format!("{}/{}@{}", namespace, name, version)),
            name,
            version,
            version_lock: false,
            priority: 0,
            dependencies: Vec::new(),
            tags: Vec::new(),
            namespace,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.plugin_id = PluginId::new(format!(
            "{}/{}@{}",
            self.namespace, self.name, self.version
        ));
        self
    }

    pub fn locked(mut self) -> Self {
        self.version_lock = true;
        self
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::EmptyName);
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError::EmptyVersion(self.name.clone()));
        }
        if self.priority > MAX_PRIORITY {
            return Err(ManifestError::PriorityOutOfRange {
                name: self.name.clone(),
                priority: self.priority,
            });
        }
        if self.dependencies.iter().any(|dep| dep == &self.name) {
            return Err(ManifestError::SelfDependency(self.name.clone()));
        }
        Ok(())
    }
}
