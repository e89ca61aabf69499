//! Pipeline phases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One stage of the fixed recovery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ingest,
    Normalize,
    Plan,
    Execute,
    Observe,
    Finish,
}

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Phase; 6] = [
        Phase::Ingest,
        Phase::Normalize,
        Phase::Plan,
        Phase::Execute,
        Phase::Observe,
        Phase::Finish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Ingest => "ingest",
            Phase::Normalize => "normalize",
            Phase::Plan => "plan",
            Phase::Execute => "execute",
            Phase::Observe => "observe",
            Phase::Finish => "finish",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == value.trim())
            .ok_or_else(|| format!("unknown phase '{}'", value))
    }
}
