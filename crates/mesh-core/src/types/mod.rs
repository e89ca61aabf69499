//! Core type definitions for the recovery mesh
//!
//! - Identifiers: transparent string newtypes
//! - Phase: the fixed six-stage pipeline
//! - Node / Edge: graph building blocks
//! - RuntimeInput: the validated graph description entering the core
//! - SignalEnvelope / TelemetryPoint: observability records

mod ids;
mod input;
mod node;
mod phase;
mod signal;

pub use ids::{CommandId, NodeId, PluginId, RunId, SignalId, WaveId};
pub use input::{InputError, RuntimeInput};
pub use node::{Edge, Node, NodeRole, INACTIVE_WEIGHT_FACTOR};
pub use phase::Phase;
pub use signal::{SignalClass, SignalEnvelope, TelemetryPoint, MAX_SEVERITY};
