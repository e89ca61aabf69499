//! Node and edge definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::{NodeId, Phase};

/// Weight multiplier applied to inactive nodes.
pub const INACTIVE_WEIGHT_FACTOR: f64 = 0.3;

/// Role a node plays in the recovery mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Source,
    Transform,
    Aggregator,
    Sink,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Source => "source",
            NodeRole::Transform => "transform",
            NodeRole::Aggregator => "aggregator",
            NodeRole::Sink => "sink",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of recoverable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    /// Expected in `[0, 1]`; topology validation flags anything else.
    pub score: f64,
    pub phase: Phase,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Node {
    /// Create an active node in the `ingest` phase.
    pub fn new(id: impl Into<NodeId>, role: NodeRole, score: f64) -> Self {
        Self {
            id: id.into(),
            role,
            score,
            phase: Phase::Ingest,
            active: true,
            metadata: Map::new(),
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Scheduling weight: the score, damped for inactive nodes.
    pub fn weight(&self) -> f64 {
        let factor = if self.active {
            1.0
        } else {
            INACTIVE_WEIGHT_FACTOR
        };
        self.score * factor
    }

    pub fn score_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.score)
    }
}

/// Directed influence or dependency between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub mandatory: bool,
}

fn default_weight() -> f64 {
    1.0
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            weight: default_weight(),
            latency_ms: 0,
            mandatory: false,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}
