//! Cursor-wrapped runtime events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesh_core::types::{CommandId, RunId, SignalEnvelope};

/// An item tagged with its position in an ordered feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor<T> {
    /// Global ordering key; merges compare on this.
    pub position: u64,
    /// Index of the fixed-size window the item was emitted in.
    pub window: u64,
    pub item: T,
}

impl<T> Cursor<T> {
    pub fn new(position: u64, item: T) -> Self {
        Self {
            position,
            window: 0,
            item,
        }
    }

    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Cursor<U> {
        Cursor {
            position: self.position,
            window: self.window,
            item: f(self.item),
        }
    }
}

/// Outcome of one plugin invocation, as seen by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEvent {
    pub plugin: String,
    pub run_id: RunId,
    #[serde(default)]
    pub command_id: Option<CommandId>,
    pub succeeded: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

/// Entry of the merged runtime feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Plugin(PluginEvent),
    Signal(SignalEnvelope),
}

impl RuntimeEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            RuntimeEvent::Plugin(event) => event.at,
            RuntimeEvent::Signal(signal) => signal.created_at,
        }
    }
}
