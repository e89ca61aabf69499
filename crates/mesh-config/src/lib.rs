//! # Mesh Config
//!
//! Single-file configuration for the recovery mesh. One `mesh.yaml`
//! configures the planner, plugin registry, default policy, observability
//! stream and logging. Every section is optional.

mod loader;

pub use loader::{load_config, parse_config, ConfigError, ConfigManager, MAX_STAGGER_MS};

use std::collections::BTreeMap;

use mesh_core::policy::Policy;
use mesh_core::types::Phase;
use serde::Deserialize;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            planner: PlannerConfig::default(),
            registry: RegistryConfig::default(),
            policy: PolicyConfig::default(),
            stream: StreamConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Initial scheduling policy built from the `policy` and `planner` sections.
    pub fn initial_policy(&self) -> Policy {
        let mut policy = Policy::new(self.policy.id.clone())
            .with_max_concurrency(f64::from(self.planner.max_concurrency));
        policy.allow_pause = self.policy.allow_pause;
        policy.allow_warnings = self.policy.allow_warnings;
        for (phase, open) in &self.policy.phase_gating {
            policy.phase_gating.insert(*phase, *open);
        }
        policy
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "recovery-mesh".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    /// Initial wave size bound; the adaptive policy retunes it per cycle.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u8,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            seed: 0,
            stagger_ms: default_stagger_ms(),
        }
    }
}

fn default_max_concurrency() -> u8 {
    3
}

fn default_stagger_ms() -> u64 {
    900
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Reject duplicate plugin names instead of replacing them.
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { strict: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_policy_id")]
    pub id: String,
    #[serde(default)]
    pub allow_pause: bool,
    #[serde(default)]
    pub allow_warnings: bool,
    /// Overrides on top of the default gating (only `ingest` open).
    #[serde(default)]
    pub phase_gating: BTreeMap<Phase, bool>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            id: default_policy_id(),
            allow_pause: false,
            allow_warnings: false,
            phase_gating: BTreeMap::new(),
        }
    }
}

fn default_policy_id() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default)]
    pub jitter_ms: u64,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            jitter_ms: 0,
            bus_capacity: default_bus_capacity(),
        }
    }
}

fn default_window_size() -> usize {
    16
}

fn default_bus_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub traces_enabled: bool,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            traces_enabled: false,
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
