//! Merged runtime feed: signals and plugin outcomes in one time-ordered stream.

use chrono::{DateTime, Utc};
use futures_util::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use mesh_core::types::SignalEnvelope;

use crate::cursor::{Cursor, PluginEvent, RuntimeEvent};
use crate::event_stream::{create_event_stream, EventStreamOptions};
use crate::merge::merge_cursor_streams_until;

/// Merge `signals` and `plugin_events` into one feed ordered by event time.
///
/// Each side is paced through `create_event_stream` with `options`, re-keyed
/// by timestamp and merged; signals win ties. Output positions are renumbered
/// `0..n` with windows of `options.window_size`. The feed ends early once
/// `token` is cancelled.
pub fn runtime_event_feed(
    signals: Vec<SignalEnvelope>,
    plugin_events: Vec<PluginEvent>,
    options: EventStreamOptions,
    token: CancellationToken,
) -> impl Stream<Item = Cursor<RuntimeEvent>> {
    let window_size = options.window_size.max(1) as u64;
    let left = timed_stream(signals.into_iter().map(RuntimeEvent::Signal).collect(), options);
    let right = timed_stream(
        plugin_events.into_iter().map(RuntimeEvent::Plugin).collect(),
        options,
    );

    merge_cursor_streams_until(left, right, token)
        .enumerate()
        .map(move |(position, cursor)| {
            let position = position as u64;
            Cursor::new(position, cursor.item).with_window(position / window_size)
        })
}

fn timed_stream(
    mut events: Vec<RuntimeEvent>,
    options: EventStreamOptions,
) -> impl Stream<Item = Cursor<RuntimeEvent>> {
    events.sort_by_key(RuntimeEvent::at);
    create_event_stream(events, options).map(|cursor| {
        let key = time_key(cursor.item.at());
        Cursor {
            position: key,
            ..cursor
        }
    })
}

/// Nanoseconds since the epoch, saturating at both ends of `u64`.
fn time_key(at: DateTime<Utc>) -> u64 {
    match at.timestamp_nanos_opt() {
        Some(nanos) => u64::try_from(nanos).unwrap_or(0),
        None if at.timestamp() > 0 => u64::MAX,
        None => 0,
    }
}
