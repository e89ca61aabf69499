//! Observability records emitted during planning and execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{NodeId, Phase, RunId, SignalId};

/// Upper bound for signal severity.
pub const MAX_SEVERITY: u8 = 5;

/// Origin class of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    Topology,
    Wave,
    Plugin,
    Policy,
}

/// An observability event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub id: SignalId,
    pub phase: Phase,
    pub source: String,
    #[serde(default)]
    pub target: Option<NodeId>,
    pub class: SignalClass,
    /// Always within `[0, MAX_SEVERITY]`.
    pub severity: u8,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl SignalEnvelope {
    /// Create a signal stamped with the current time. Severity is clamped.
    pub fn new(
        phase: Phase,
        source: impl Into<String>,
        class: SignalClass,
        severity: i64,
        payload: Value,
    ) -> Self {
        Self {
            id: SignalId::generate(),
            phase,
            source: source.into(),
            target: None,
            class,
            severity: clamp_severity(severity),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: impl Into<NodeId>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

fn clamp_severity(severity: i64) -> u8 {
    severity.clamp(0, MAX_SEVERITY as i64) as u8
}

/// A scalar observation keyed under the `mesh.` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPoint {
    pub key: String,
    pub value: f64,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryPoint {
    /// Build a point whose key is `mesh.<suffix>`.
    pub fn mesh(
        suffix: impl fmt::Display,
        value: f64,
        run_id: RunId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            key: format!("mesh.{}", suffix),
            value,
            run_id,
            timestamp,
        }
    }
}
