//! Plugin catalog normalization, reconciliation and health.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::manifest::PluginManifest;

/// Spacing between synthetic load timestamps of consecutive ranks.
pub const LOAD_ORDER_STEP_MS: i64 = 1_000;

/// A manifest with its assigned load timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub manifest: PluginManifest,
    pub loaded_at: DateTime<Utc>,
}

/// Aggregate catalog health derived from average priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogHealth {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for CatalogHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CatalogHealth::Green => "green",
            CatalogHealth::Yellow => "yellow",
            CatalogHealth::Red => "red",
        };
        f.write_str(label)
    }
}

/// Assign load timestamps by priority rank and return entries in load order.
///
/// Manifests are ranked by descending priority (stable), rank `r` is stamped
/// `now - r * LOAD_ORDER_STEP_MS`, and the result is sorted ascending by that
/// stamp.
pub fn normalize_catalog(manifests: Vec<PluginManifest>, now: DateTime<Utc>) -> Vec<CatalogEntry> {
    let mut ranked = manifests;
    ranked.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut entries: Vec<CatalogEntry> = ranked
        .into_iter()
        .enumerate()
        .map(|(rank, manifest)| CatalogEntry {
            manifest,
            loaded_at: now - Duration::milliseconds(rank as i64 * LOAD_ORDER_STEP_MS),
        })
        .collect();
    entries.sort_by(|a, b| a.loaded_at.cmp(&b.loaded_at));
    entries
}

/// Merge two manifest lists, keeping the higher-priority manifest per name.
///
/// `remote` is folded in after `local`, so remote wins ties. A version-locked
/// manifest is only replaced by a candidate carrying the same version.
/// Output is sorted by name.
pub fn reconcile_catalog(
    local: &[PluginManifest],
    remote: &[PluginManifest],
) -> Vec<PluginManifest> {
    let mut merged: BTreeMap<&str, &PluginManifest> = BTreeMap::new();
    for candidate in local.iter().chain(remote.iter()) {
        match merged.get(candidate.name.as_str()) {
            Some(existing)
                if existing.version_lock && existing.version != candidate.version =>
            {
                tracing::debug!(
                    plugin = %candidate.name,
                    pinned = %existing.version,
                    offered = %candidate.version,
                    "catalog kept version-locked manifest"
                );
            }
            Some(existing) if existing.priority > candidate.priority => {}
            _ => {
                merged.insert(candidate.name.as_str(), candidate);
            }
        }
    }
    merged.into_values().cloned().collect()
}

/// `red` at average priority >= 4, `yellow` at >= 2.5, otherwise `green`.
pub fn catalog_health(entries: &[CatalogEntry]) -> CatalogHealth {
    if entries.is_empty() {
        return CatalogHealth::Green;
    }
    let total: f64 = entries.iter().map(|e| f64::from(e.manifest.priority)).sum();
    let average = total / entries.len() as f64;
    if average >= 4.0 {
        CatalogHealth::Red
    } else if average >= 2.5 {
        CatalogHealth::Yellow
    } else {
        CatalogHealth::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str, priority: u8) -> PluginManifest {
        PluginManifest::new(name, "1.0.0").with_priority(priority)
    }

    #[test]
    fn test_normalize_orders_by_synthetic_load_time() {
        let now = Utc::now();
        let entries = normalize_catalog(
            vec![manifest("low", 1), manifest("high", 5), manifest("mid", 3)],
            now,
        );

        let names: Vec<&str> = entries.iter().map(|e| e.manifest.name.as_str()).collect();
        assert_eq!(names, vec!["low", "mid", "high"]);
        assert_eq!(entries[2].loaded_at, now);
        assert_eq!(entries[0].loaded_at, now - Duration::milliseconds(2_000));
    }

    #[test]
    fn test_normalize_keeps_input_order_for_priority_ties() {
        let now = Utc::now();
        let entries = normalize_catalog(vec![manifest("first", 2), manifest("second", 2)], now);
        // Rank 0 ("first") gets the latest stamp, so it loads last.
        let names: Vec<&str> = entries.iter().map(|e| e.manifest.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn test_reconcile_prefers_higher_priority_and_remote_on_ties() {
        let local = vec![manifest("snapshot", 4), manifest("restore", 2)];
        let mut remote_restore = manifest("restore", 2);
        remote_restore.version = "2.0.0".to_string();
        let remote = vec![manifest("snapshot", 1), remote_restore, manifest("verify", 0)];

        let merged = reconcile_catalog(&local, &remote);
        let summary: Vec<(&str, u8, &str)> = merged
            .iter()
            .map(|m| (m.name.as_str(), m.priority, m.version.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("restore", 2, "2.0.0"),
                ("snapshot", 4, "1.0.0"),
                ("verify", 0, "1.0.0"),
            ]
        );
    }

    #[test]
    fn test_reconcile_respects_version_lock() {
        let local = vec![manifest("snapshot", 1).locked()];
        let mut newer = manifest("snapshot", 5);
        newer.version = "3.0.0".to_string();

        let merged = reconcile_catalog(&local, &[newer]);
        assert_eq!(merged[0].version, "1.0.0");
        assert_eq!(merged[0].priority, 1);
    }

    #[test]
    fn test_catalog_health_thresholds() {
        let now = Utc::now();
        let health = |priorities: &[u8]| {
            let manifests = priorities
                .iter()
                .enumerate()
                .map(|(i, p)| manifest(&format!("p{i}"), *p))
                .collect();
            catalog_health(&normalize_catalog(manifests, now))
        };
        assert_eq!(health(&[]), CatalogHealth::Green);
        assert_eq!(health(&[1, 2]), CatalogHealth::Green);
        assert_eq!(health(&[2, 3]), CatalogHealth::Yellow);
        assert_eq!(health(&[4, 4]), CatalogHealth::Red);
        assert_eq!(health(&[5, 3]), CatalogHealth::Red);
    }
}
