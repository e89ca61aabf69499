//! Paced, windowed event streams.

use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};

use crate::cursor::Cursor;

/// Stream pacing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStreamOptions {
    /// Items per window; zero is treated as one.
    pub window_size: usize,
    /// Delay inserted between consecutive items.
    pub jitter: Duration,
}

impl Default for EventStreamOptions {
    fn default() -> Self {
        Self {
            window_size: 16,
            jitter: Duration::ZERO,
        }
    }
}

impl EventStreamOptions {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Wrap `events` into an ordered cursor stream.
///
/// Positions run from zero in input order; the window index is
/// `position / window_size`. With a non-zero jitter the stream sleeps between
/// items, which needs a tokio runtime with the time driver enabled.
pub fn create_event_stream<T>(
    events: Vec<T>,
    options: EventStreamOptions,
) -> impl Stream<Item = Cursor<T>> {
    let window_size = options.window_size.max(1);
    let jitter = options.jitter;

    stream::iter(events.into_iter().enumerate()).then(move |(position, item)| async move {
        if position > 0 && !jitter.is_zero() {
            tokio::time::sleep(jitter).await;
        }
        Cursor::new(position as u64, item).with_window((position / window_size) as u64)
    })
}

/// Group a collected feed by window index, preserving order.
pub fn split_windows<T>(cursors: Vec<Cursor<T>>) -> Vec<Vec<Cursor<T>>> {
    let mut windows: Vec<Vec<Cursor<T>>> = Vec::new();
    for cursor in cursors {
        if let Some(current) = windows.last_mut() {
            if current.last().map(|last| last.window) == Some(cursor.window) {
                current.push(cursor);
                continue;
            }
        }
        windows.push(vec![cursor]);
    }
    windows
}
