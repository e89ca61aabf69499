//! # Mesh Core
//!
//! Planning and dispatch core of the recovery automation mesh.
//!
//! This crate contains:
//! - Node / Edge / Phase / identifier definitions
//! - Topology validation (cycle and connectivity checks)
//! - Versioned plugin catalog and registry
//! - Concurrency-bounded wave planning
//! - Adaptive policy tuning from topology pressure
//!
//! This crate does NOT:
//! - Execute commands against real infrastructure
//! - Persist anything across restarts
//! - Coordinate across processes

pub mod planner;
pub mod plugin;
pub mod policy;
pub mod topology;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::planner::{
        effective_concurrency, plan_digest, plan_waves, plan_waves_at, Command, MeshPlannerOutput,
        PlannerInput, Wave,
    };
    pub use crate::plugin::{
        catalog_health, normalize_catalog, reconcile_catalog, CatalogEntry, CatalogHealth,
        FnPlugin, Plugin, PluginContext, PluginError, PluginInput, PluginManifest,
        PluginRegistry, RegistryError,
    };
    pub use crate::policy::{
        apply_policy_tune, clamp_concurrency, phase_pressure, tune_policy, Policy, PolicyTune,
    };
    pub use crate::topology::{
        build_runtime_graph, detect_cycles, GraphBuildError, TopologySnapshot,
    };
    pub use crate::types::{
        CommandId, Edge, InputError, Node, NodeId, NodeRole, Phase, PluginId, RunId,
        RuntimeInput, SignalClass, SignalEnvelope, SignalId, TelemetryPoint, WaveId,
    };
}

// Re-export key entry points at crate root
pub use planner::{plan_waves, MeshPlannerOutput, PlannerInput};
pub use plugin::{Plugin, PluginRegistry, RegistryError};
pub use policy::{apply_policy_tune, tune_policy, Policy, PolicyTune};
pub use topology::{build_runtime_graph, GraphBuildError, TopologySnapshot};
