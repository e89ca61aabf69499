//! Adaptive Policy
//!
//! Closed-loop tuning of the scheduling policy from observed topology
//! pressure. Every function here is total: outputs are clamped, so tuning can
//! never produce an invalid policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::planner::Wave;
use crate::topology::TopologySnapshot;
use crate::types::{Phase, PluginId};

/// Upper bound for `Policy::max_concurrency`.
pub const MAX_POLICY_CONCURRENCY: u8 = 5;

/// Tunable scheduling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: String,
    /// Always within `[0, MAX_POLICY_CONCURRENCY]`.
    pub max_concurrency: u8,
    #[serde(default)]
    pub allow_pause: bool,
    #[serde(default)]
    pub allow_warnings: bool,
    #[serde(default)]
    pub plugin_ids: Vec<PluginId>,
    #[serde(default)]
    pub phase_gating: BTreeMap<Phase, bool>,
}

impl Policy {
    /// New policy with only `ingest` open.
    pub fn new(id: impl Into<String>) -> Self {
        let phase_gating = Phase::ALL
            .into_iter()
            .map(|phase| (phase, phase == Phase::Ingest))
            .collect();
        Self {
            id: id.into(),
            max_concurrency: 1,
            allow_pause: false,
            allow_warnings: false,
            plugin_ids: Vec::new(),
            phase_gating,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: f64) -> Self {
        self.max_concurrency = clamp_concurrency(max_concurrency);
        self
    }

    pub fn with_plugin_ids(mut self, plugin_ids: Vec<PluginId>) -> Self {
        self.plugin_ids = plugin_ids;
        self
    }

    pub fn with_gate(mut self, phase: Phase, open: bool) -> Self {
        self.phase_gating.insert(phase, open);
        self
    }

    pub fn allows(&self, phase: Phase) -> bool {
        self.phase_gating.get(&phase).copied().unwrap_or(false)
    }
}

/// Result of one tuning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTune {
    pub target_phase: Phase,
    pub target_concurrency: u8,
    pub pressure: f64,
}

/// Round and clamp into `[0, MAX_POLICY_CONCURRENCY]`. NaN maps to 0.
pub fn clamp_concurrency(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, f64::from(MAX_POLICY_CONCURRENCY)) as u8
}

/// `edges / max(1, nodes) + inactive nodes`.
pub fn phase_pressure(topology: &TopologySnapshot) -> f64 {
    let nodes = topology.node_count().max(1) as f64;
    topology.edge_count() as f64 / nodes + topology.inactive_count() as f64
}

/// Next concurrency for a given current bound, pressure and wave count.
pub fn target_concurrency(max_concurrency: f64, pressure: f64, wave_count: usize) -> u8 {
    clamp_concurrency(max_concurrency + pressure / wave_count.max(1) as f64)
}

/// Compute the tuning step for the next planning cycle.
pub fn tune_policy(policy: &Policy, topology: &TopologySnapshot, waves: &[Wave]) -> PolicyTune {
    let pressure = phase_pressure(topology);
    let target_phase = if waves.is_empty() {
        Phase::Plan
    } else {
        Phase::Execute
    };
    let tune = PolicyTune {
        target_phase,
        target_concurrency: target_concurrency(
            f64::from(policy.max_concurrency),
            pressure,
            waves.len(),
        ),
        pressure,
    };
    tracing::debug!(
        policy = %policy.id,
        pressure,
        from = policy.max_concurrency,
        to = tune.target_concurrency,
        phase = %tune.target_phase,
        "policy tuned"
    );
    tune
}

/// Apply a tune, producing a new policy. The target phase gate is opened;
/// other gates are untouched.
pub fn apply_policy_tune(policy: &Policy, tune: &PolicyTune) -> Policy {
    let mut next = policy.clone();
    next.max_concurrency = tune.target_concurrency.min(MAX_POLICY_CONCURRENCY);
    let gate = next.phase_gating.entry(tune.target_phase).or_insert(false);
    *gate = true;
    next
}
