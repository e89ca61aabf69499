//! # Mesh Runtime
//!
//! Wires configuration, plugin registry, planner, policy and signal bus
//! into a runnable planning cycle.
//!
//! - `MeshRuntime::plan_cycle`: validate, build topology, plan, tune, publish
//! - `WaveDispatcher`: bounded-concurrency execution of one wave
//! - `MeshRuntime::event_feed`: signals and plugin outcomes as one ordered feed
//! - `init_tracing_if_needed`: global subscriber from config

mod bootstrap;
mod dispatcher;
mod runtime;

pub use bootstrap::{init_tracing_if_needed, LOG_FILE_ENV};
pub use dispatcher::{CommandOutcome, DispatchReport, WaveDispatcher};
pub use runtime::{CycleReport, MeshRuntime, RuntimeError};
