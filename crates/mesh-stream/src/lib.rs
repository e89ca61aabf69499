//! # Mesh Stream
//!
//! Observability stream for the recovery mesh.
//!
//! This crate provides:
//! - Cursor-wrapped, windowed event streams with optional pacing
//! - Ordered two-way merge of cursor streams
//! - Time-ordered runtime feed of signals and plugin outcomes
//! - Windowed signal aggregates
//! - In-process SignalBus

mod cursor;
mod event_stream;
mod feed;
mod merge;
mod signal_bus;
mod window;

use thiserror::Error;

pub use cursor::{Cursor, PluginEvent, RuntimeEvent};
pub use event_stream::{create_event_stream, split_windows, EventStreamOptions};
pub use feed::runtime_event_feed;
pub use merge::{merge_cursor_streams, merge_cursor_streams_until};
pub use signal_bus::{BroadcastSignalBus, SignalBus, SignalSubscription};
pub use window::{
    aggregate_windows, calculate_observability_window, calculate_observability_window_at,
    ObservabilityWindow,
};

/// Stream error types
#[derive(Debug, Error, PartialEq)]
pub enum StreamError {
    #[error("subscriber lagged behind by {0} signals")]
    Lagged(u64),
}
