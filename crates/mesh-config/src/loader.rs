//! Configuration loading and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mesh_core::policy::MAX_POLICY_CONCURRENCY;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::MeshConfig;

/// Upper bound for `planner.stagger_ms` (one hour).
pub const MAX_STAGGER_MS: u64 = 3_600_000;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load and validate configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<MeshConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(content: &str) -> Result<MeshConfig, ConfigError> {
    let config: MeshConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &MeshConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.planner.max_concurrency > MAX_POLICY_CONCURRENCY {
        return Err(ConfigError::Invalid(format!(
            "planner.max_concurrency must be <= {}",
            MAX_POLICY_CONCURRENCY
        )));
    }

    if config.planner.stagger_ms > MAX_STAGGER_MS {
        return Err(ConfigError::Invalid(format!(
            "planner.stagger_ms must be <= {}",
            MAX_STAGGER_MS
        )));
    }

    if config.policy.id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "policy.id must not be empty".to_string(),
        ));
    }

    if config.stream.window_size == 0 {
        return Err(ConfigError::Invalid(
            "stream.window_size must be > 0".to_string(),
        ));
    }

    if config.stream.bus_capacity == 0 {
        return Err(ConfigError::Invalid(
            "stream.bus_capacity must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Holds the current configuration and reloads it on demand.
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<MeshConfig>>,
}

impl ConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Arc::new(RwLock::new(MeshConfig::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared handle to the current config.
    pub fn config(&self) -> Arc<RwLock<MeshConfig>> {
        self.config.clone()
    }

    /// Re-read the file. On failure the previous config stays in place.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(path = %self.path.display(), error = %err, "failed to reload config");
                return Err(err);
            }
        };
        *self.config.write().await = config;
        tracing::info!(path = %self.path.display(), "config reloaded");
        Ok(())
    }
}
