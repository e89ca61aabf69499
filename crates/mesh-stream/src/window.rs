//! Windowed aggregates over signal feeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesh_core::types::SignalEnvelope;

use crate::cursor::Cursor;

/// Aggregate view of a run of signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityWindow {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub sample_size: usize,
    pub average_severity: f64,
}

/// Aggregate `signals`; an empty input yields a zero-width window at now.
pub fn calculate_observability_window(signals: &[SignalEnvelope]) -> ObservabilityWindow {
    calculate_observability_window_at(signals, Utc::now())
}

/// Aggregate `signals`, using `now` for the empty case.
pub fn calculate_observability_window_at(
    signals: &[SignalEnvelope],
    now: DateTime<Utc>,
) -> ObservabilityWindow {
    let (Some(started_at), Some(ended_at)) = (
        signals.iter().map(|s| s.created_at).min(),
        signals.iter().map(|s| s.created_at).max(),
    ) else {
        return ObservabilityWindow {
            started_at: now,
            ended_at: now,
            sample_size: 0,
            average_severity: 0.0,
        };
    };

    let total: f64 = signals.iter().map(|s| f64::from(s.severity)).sum();
    ObservabilityWindow {
        started_at,
        ended_at,
        sample_size: signals.len(),
        average_severity: total / signals.len() as f64,
    }
}

/// One aggregate per cursor window, in window order.
pub fn aggregate_windows(cursors: &[Cursor<SignalEnvelope>]) -> Vec<(u64, ObservabilityWindow)> {
    let mut grouped: Vec<(u64, Vec<SignalEnvelope>)> = Vec::new();
    for cursor in cursors {
        if let Some((window, signals)) = grouped.last_mut() {
            if *window == cursor.window {
                signals.push(cursor.item.clone());
                continue;
            }
        }
        grouped.push((cursor.window, vec![cursor.item.clone()]));
    }
    grouped
        .into_iter()
        .map(|(window, signals)| (window, calculate_observability_window(&signals)))
        .collect()
}
