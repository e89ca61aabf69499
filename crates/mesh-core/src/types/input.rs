//! Runtime input contract and its boundary validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use super::{Edge, Node, Phase, PluginId};

/// Input validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("input declares no phases")]
    NoPhases,

    #[error("input declares no plugin ids")]
    NoPlugins,

    #[error("node '{0}' has score {1} outside [0, 1]")]
    ScoreOutOfRange(String, f64),

    #[error("edge {0}->{1} has non-positive weight {2}")]
    NonPositiveWeight(String, String, f64),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
}

/// A graph description handed to the mesh by the outer service layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInput {
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub plugin_ids: Vec<PluginId>,
}

impl RuntimeInput {
    /// Apply the schema-level checks the service layer performs before the
    /// input reaches the planner.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.phases.is_empty() {
            return Err(InputError::NoPhases);
        }
        if self.plugin_ids.is_empty() {
            return Err(InputError::NoPlugins);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(InputError::DuplicateNode(node.id.to_string()));
            }
            if !node.score.is_finite() || !node.score_in_range() {
                return Err(InputError::ScoreOutOfRange(node.id.to_string(), node.score));
            }
        }

        for edge in &self.edges {
            // NaN fails this comparison too.
            if !(edge.weight > 0.0) {
                return Err(InputError::NonPositiveWeight(
                    edge.from.to_string(),
                    edge.to.to_string(),
                    edge.weight,
                ));
            }
        }

        Ok(())
    }
}
