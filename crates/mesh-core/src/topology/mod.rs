//! Topology Model
//!
//! Turns raw node and edge sets into a validated, immutable snapshot for one
//! planning cycle.
//!
//! Validation order:
//! 1. empty node set fails immediately
//! 2. adjacency is built from self-loop-free edges
//! 3. out-of-range scores become warnings
//! 4. without score warnings, dangling edges become warnings
//! 5. cycles fail the build and take priority over warnings
//! 6. remaining warnings fail the build as `disconnected`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::types::{Edge, Node, NodeId, RunId};

/// Adjacency map keyed by node id, values in edge order.
pub type Adjacency = BTreeMap<NodeId, Vec<NodeId>>;

/// Graph build errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphBuildError {
    #[error("empty: topology has no nodes")]
    Empty,

    #[error("cycle: {count} cycle(s) detected")]
    Cycle {
        count: usize,
        cycles: Vec<Vec<NodeId>>,
    },

    #[error("disconnected: {}", .warnings.join("|"))]
    Disconnected { warnings: Vec<String> },
}

impl GraphBuildError {
    /// Short machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Cycle { .. } => "cycle",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

/// Validated graph snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    pub run_id: RunId,
    /// Sorted by id.
    pub nodes: Vec<Node>,
    /// Input edges minus self-loops.
    pub edges: Vec<Edge>,
    pub adjacency: Adjacency,
    pub cycles: Vec<Vec<NodeId>>,
    pub warnings: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl TopologySnapshot {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes
            .binary_search_by(|node| node.id.as_str().cmp(id))
            .ok()
            .map(|index| &self.nodes[index])
    }

    pub fn successors(&self, id: &str) -> &[NodeId] {
        self.adjacency
            .get(&NodeId::from(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn inactive_count(&self) -> usize {
        self.nodes.iter().filter(|node| !node.active).count()
    }
}

/// Validate a node/edge set and freeze it into a snapshot.
pub fn build_runtime_graph(
    run_id: impl Into<RunId>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
) -> Result<TopologySnapshot, GraphBuildError> {
    let run_id = run_id.into();
    if nodes.is_empty() {
        return Err(GraphBuildError::Empty);
    }

    let edges: Vec<Edge> = edges.into_iter().filter(|e| !e.is_self_loop()).collect();

    let mut adjacency: Adjacency = nodes
        .iter()
        .map(|node| (node.id.clone(), Vec::new()))
        .collect();
    for edge in &edges {
        if !adjacency.contains_key(&edge.to) {
            continue;
        }
        if let Some(successors) = adjacency.get_mut(&edge.from) {
            successors.push(edge.to.clone());
        }
    }

    let mut warnings: Vec<String> = nodes
        .iter()
        .filter(|node| !node.score_in_range())
        .map(|node| format!("score:{}", node.id))
        .collect();

    if warnings.is_empty() {
        warnings.extend(
            edges
                .iter()
                .filter(|e| !adjacency.contains_key(&e.from) || !adjacency.contains_key(&e.to))
                .map(|e| format!("dangling:{}->{}", e.from, e.to)),
        );
    }

    let cycles = detect_cycles(&adjacency);
    if !cycles.is_empty() {
        tracing::warn!(
            run_id = %run_id,
            cycles = cycles.len(),
            "topology rejected: cycle detected"
        );
        return Err(GraphBuildError::Cycle {
            count: cycles.len(),
            cycles,
        });
    }

    if !warnings.is_empty() {
        tracing::warn!(
            run_id = %run_id,
            warnings = %warnings.join("|"),
            "topology rejected: disconnected"
        );
        return Err(GraphBuildError::Disconnected { warnings });
    }

    let mut nodes = nodes;
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    tracing::debug!(
        run_id = %run_id,
        nodes = nodes.len(),
        edges = edges.len(),
        "topology built"
    );

    Ok(TopologySnapshot {
        run_id,
        nodes,
        edges,
        adjacency,
        cycles: Vec::new(),
        warnings: Vec::new(),
        updated_at: Utc::now(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Find every cycle reachable in `adjacency`.
///
/// Iterative three-colour DFS with an explicit path stack. Each back-edge into
/// an in-progress node records the stack suffix starting at that node as one
/// cycle. Roots are visited in key order, so the result is deterministic.
pub fn detect_cycles(adjacency: &Adjacency) -> Vec<Vec<NodeId>> {
    let mut marks: HashMap<&NodeId, Mark> =
        adjacency.keys().map(|id| (id, Mark::Unvisited)).collect();
    let mut cycles = Vec::new();

    for root in adjacency.keys() {
        if marks.get(root) != Some(&Mark::Unvisited) {
            continue;
        }

        // (node, index of the next successor to explore)
        let mut stack: Vec<(&NodeId, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::InProgress);

        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            let successors = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);

            if cursor >= successors.len() {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            }

            frame.1 += 1;
            let next = &successors[cursor];
            // Successors outside the key set cannot extend a path.
            match marks.get(next).copied().unwrap_or(Mark::Done) {
                Mark::Unvisited => {
                    marks.insert(next, Mark::InProgress);
                    stack.push((next, 0));
                }
                Mark::InProgress => {
                    if let Some(start) = stack.iter().position(|(id, _)| *id == next) {
                        cycles.push(stack[start..].iter().map(|(id, _)| (*id).clone()).collect());
                    }
                }
                Mark::Done => {}
            }
        }
    }

    cycles
}

/// Nodes whose scheduling weight reaches `threshold`, in snapshot order.
///
/// Provisional: the selection rule for critical nodes is not settled. The
/// caller-supplied threshold and `weight >= threshold` cut may change, so this
/// is kept out of the prelude.
pub fn critical_nodes(snapshot: &TopologySnapshot, threshold: f64) -> Vec<&Node> {
    snapshot
        .nodes
        .iter()
        .filter(|node| node.weight() >= threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRole;

    fn node(id: &str, score: f64) -> Node {
        Node::new(id, NodeRole::Transform, score)
    }

    #[test]
    fn test_empty_node_set_fails() {
        let err = build_runtime_graph("run-1", Vec::new(), Vec::new()).unwrap_err();
        assert_eq!(err, GraphBuildError::Empty);
        assert_eq!(err.kind(), "empty");
    }

    #[test]
    fn test_nodes_are_sorted_and_adjacency_reflects_edges() {
        let snapshot = build_runtime_graph(
            "run-1",
            vec![node("c", 0.1), node("a", 0.5), node("b", 0.9)],
            vec![Edge::new("a", "b"), Edge::new("a", "c"), Edge::new("b", "c")],
        )
        .expect("snapshot");

        let ids: Vec<&str> = snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(snapshot.successors("a"), &[NodeId::from("b"), NodeId::from("c")]);
        assert_eq!(snapshot.successors("c"), &[] as &[NodeId]);
        assert!(snapshot.cycles.is_empty());
        assert!(snapshot.warnings.is_empty());
        assert_eq!(snapshot.node("b").map(|n| n.score), Some(0.9));
    }

    #[test]
    fn test_self_loops_are_filtered_not_rejected() {
        let snapshot = build_runtime_graph(
            "run-1",
            vec![node("a", 0.5), node("b", 0.5)],
            vec![Edge::new("a", "a"), Edge::new("a", "b")],
        )
        .expect("snapshot");
        assert_eq!(snapshot.edge_count(), 1);
        assert_eq!(snapshot.successors("a"), &[NodeId::from("b")]);
    }

    #[test]
    fn test_mutual_edges_are_a_cycle() {
        let err = build_runtime_graph(
            "run-1",
            vec![node("a", 0.5), node("b", 0.5)],
            vec![Edge::new("a", "b"), Edge::new("b", "a")],
        )
        .unwrap_err();
        match err {
            GraphBuildError::Cycle { count, cycles } => {
                assert_eq!(count, 1);
                assert_eq!(cycles[0], vec![NodeId::from("a"), NodeId::from("b")]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_all_cycles_are_reported() {
        let mut adjacency = Adjacency::new();
        adjacency.insert("a".into(), vec!["b".into()]);
        adjacency.insert("b".into(), vec!["a".into(), "c".into()]);
        adjacency.insert("c".into(), vec!["d".into()]);
        adjacency.insert("d".into(), vec!["c".into()]);

        let cycles = detect_cycles(&adjacency);
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[1], vec![NodeId::from("c"), NodeId::from("d")]);
    }

    #[test]
    fn test_cycle_takes_priority_over_score_warnings() {
        let err = build_runtime_graph(
            "run-1",
            vec![node("a", 1.5), node("b", 0.5)],
            vec![Edge::new("a", "b"), Edge::new("b", "a")],
        )
        .unwrap_err();
        assert_eq!(err.kind(), "cycle");
        assert_eq!(err.to_string(), "cycle: 1 cycle(s) detected");
    }

    #[test]
    fn test_score_warnings_fail_as_disconnected() {
        let err = build_runtime_graph(
            "run-1",
            vec![node("a", 1.5), node("b", -0.1)],
            vec![Edge::new("a", "ghost")],
        )
        .unwrap_err();
        // Dangling edges are only reported when every score is valid.
        assert_eq!(
            err,
            GraphBuildError::Disconnected {
                warnings: vec!["score:a".to_string(), "score:b".to_string()]
            }
        );
        assert_eq!(err.to_string(), "disconnected: score:a|score:b");
    }

    #[test]
    fn test_dangling_edges_fail_as_disconnected() {
        let err = build_runtime_graph(
            "run-1",
            vec![node("a", 0.5)],
            vec![Edge::new("a", "ghost")],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "disconnected: dangling:a->ghost");
    }

    #[test]
    fn test_critical_nodes_use_weight_threshold() {
        let snapshot = build_runtime_graph(
            "run-1",
            vec![
                node("a", 0.9),
                node("b", 0.9).with_active(false),
                node("c", 0.4),
            ],
            Vec::new(),
        )
        .expect("snapshot");
        let critical: Vec<&str> = critical_nodes(&snapshot, 0.5)
            .into_iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(critical, vec!["a"]);
        assert_eq!(snapshot.inactive_count(), 1);
    }

    #[test]
    fn test_critical_nodes_threshold_is_inclusive() {
        let snapshot =
            build_runtime_graph("run-1", vec![node("a", 0.5), node("b", 0.25)], Vec::new())
                .expect("snapshot");
        assert_eq!(critical_nodes(&snapshot, 0.5).len(), 1);
        assert!(critical_nodes(&snapshot, f64::NAN).is_empty());
    }
}
