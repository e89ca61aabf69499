//! Wave Planner
//!
//! Ranks nodes by weight and partitions them into concurrency-bounded waves.
//! The planner is a pure function of its input and a reference time: it
//! emits command descriptors, one telemetry point per wave and a
//! deterministic plan digest, but never executes anything.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CommandId, Edge, Node, NodeId, Phase, RunId, TelemetryPoint, WaveId};

/// Default delay between the start times of consecutive waves.
pub const WAVE_STAGGER_MS: i64 = 900;
/// Maximum plan digest length in characters.
pub const PLAN_DIGEST_MAX_CHARS: usize = 120;
/// Actor recorded on every planned command.
pub const PLANNER_ACTOR: &str = "mesh-planner";

/// Planner input for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerInput {
    pub run_id: RunId,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub max_concurrency: f64,
    #[serde(default)]
    pub seed: u64,
    /// Delay between consecutive wave start times.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: i64,
}

fn default_stagger_ms() -> i64 {
    WAVE_STAGGER_MS
}

impl PlannerInput {
    pub fn new(run_id: impl Into<RunId>, nodes: Vec<Node>, max_concurrency: f64) -> Self {
        Self {
            run_id: run_id.into(),
            nodes,
            edges: Vec::new(),
            max_concurrency,
            seed: 0,
            stagger_ms: WAVE_STAGGER_MS,
        }
    }

    pub fn with_edges(mut self, edges: Vec<Edge>) -> Self {
        self.edges = edges;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_stagger_ms(mut self, stagger_ms: i64) -> Self {
        self.stagger_ms = stagger_ms.max(0);
        self
    }
}

/// Descriptor of one node's directed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_id: CommandId,
    pub run_id: RunId,
    pub node_id: NodeId,
    pub action: String,
    pub actor: String,
    pub rationale: String,
}

/// A concurrency-bounded execution batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wave {
    pub id: WaveId,
    pub run_id: RunId,
    pub phase: Phase,
    pub command_ids: Vec<CommandId>,
    pub nodes: Vec<NodeId>,
    pub start_at: DateTime<Utc>,
    pub window_minutes: u32,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Planner output consumed by the execution harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshPlannerOutput {
    pub run_id: RunId,
    pub waves: Vec<Wave>,
    pub commands: Vec<Command>,
    pub command_ids: Vec<CommandId>,
    pub telemetry: Vec<TelemetryPoint>,
    pub plan_digest: String,
}

impl MeshPlannerOutput {
    /// Commands belonging to `wave`, in wave order.
    pub fn commands_for<'a>(&'a self, wave: &'a Wave) -> impl Iterator<Item = &'a Command> + 'a {
        wave.command_ids
            .iter()
            .filter_map(move |id| self.commands.iter().find(|c| &c.command_id == id))
    }
}

/// `max(1, round(max_concurrency))`; non-finite or tiny values yield 1.
pub fn effective_concurrency(max_concurrency: f64) -> usize {
    let rounded = max_concurrency.round();
    if rounded >= 1.0 {
        rounded as usize
    } else {
        1
    }
}

/// Plan waves starting from the current time.
pub fn plan_waves(input: &PlannerInput) -> MeshPlannerOutput {
    plan_waves_at(input, Utc::now())
}

/// Plan waves with `now` as the start of the first wave.
pub fn plan_waves_at(input: &PlannerInput, now: DateTime<Utc>) -> MeshPlannerOutput {
    let concurrency = effective_concurrency(input.max_concurrency);

    let mut ranked: Vec<&Node> = input.nodes.iter().collect();
    // Stable: equal weights keep input order.
    ranked.sort_by(|a, b| b.weight().total_cmp(&a.weight()));

    let mut waves = Vec::new();
    let mut commands = Vec::new();
    let mut telemetry = Vec::new();

    for (index, group) in ranked.chunks(concurrency).enumerate() {
        let phase = if index == 0 {
            Phase::Plan
        } else {
            Phase::Execute
        };
        let start_at = wave_start(now, input.stagger_ms, index);
        let window_minutes = (group.len() * 2 + index).max(1) as u32;

        let mut command_ids = Vec::with_capacity(group.len());
        for (position, node) in group.iter().enumerate() {
            let command = Command {
                command_id: CommandId::new(format!("{}:cmd:{}", node.id, position)),
                run_id: input.run_id.clone(),
                node_id: node.id.clone(),
                action: format!("{}:{}", phase, node.role),
                actor: PLANNER_ACTOR.to_string(),
                rationale: format!("weight {:.3} ranked into wave {}", node.weight(), index),
            };
            command_ids.push(command.command_id.clone());
            commands.push(command);
        }

        telemetry.push(TelemetryPoint::mesh(
            phase,
            group.len() as f64,
            input.run_id.clone(),
            start_at,
        ));

        tracing::debug!(
            run_id = %input.run_id,
            wave = index,
            phase = %phase,
            size = group.len(),
            "wave planned"
        );

        waves.push(Wave {
            id: WaveId::new(format!("{}:wave:{}", input.run_id, index)),
            run_id: input.run_id.clone(),
            phase,
            command_ids,
            nodes: group.iter().map(|node| node.id.clone()).collect(),
            start_at,
            window_minutes,
        });
    }

    let command_ids = commands.iter().map(|c| c.command_id.clone()).collect();
    let plan_digest = plan_digest(&input.nodes);

    tracing::info!(
        run_id = %input.run_id,
        waves = waves.len(),
        commands = commands.len(),
        concurrency,
        seed = input.seed,
        "waves planned"
    );

    MeshPlannerOutput {
        run_id: input.run_id.clone(),
        waves,
        commands,
        command_ids,
        telemetry,
        plan_digest,
    }
}

/// `now + stagger_ms * index`; an offset outside chrono's range saturates to `now`.
fn wave_start(now: DateTime<Utc>, stagger_ms: i64, index: usize) -> DateTime<Utc> {
    i64::try_from(index)
        .ok()
        .and_then(|index| stagger_ms.checked_mul(index))
        .and_then(Duration::try_milliseconds)
        .and_then(|offset| now.checked_add_signed(offset))
        .unwrap_or(now)
}

/// Fingerprint of the node sequence in input order.
///
/// `role:id:phase` tokens are joined with `|`, the sequence is repeated three
/// times and the result truncated to `PLAN_DIGEST_MAX_CHARS` characters.
pub fn plan_digest(nodes: &[Node]) -> String {
    let sequence = nodes
        .iter()
        .map(|node| format!("{}:{}:{}", node.role, node.id, node.phase))
        .collect::<Vec<_>>()
        .join("|");
    sequence
        .repeat(3)
        .chars()
        .take(PLAN_DIGEST_MAX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRole;
    use std::collections::HashSet;

    fn scored(scores: &[f64]) -> Vec<Node> {
        scores
            .iter()
            .enumerate()
            .map(|(i, score)| Node::new(format!("n{i}"), NodeRole::Transform, *score))
            .collect()
    }

    fn ids(wave: &Wave) -> Vec<&str> {
        wave.nodes.iter().map(NodeId::as_str).collect()
    }

    #[test]
    fn test_four_nodes_two_per_wave() {
        let input = PlannerInput::new("run-1", scored(&[0.3, 0.9, 0.5, 0.7]), 2.0);
        let output = plan_waves(&input);

        assert_eq!(output.waves.len(), 2);
        assert_eq!(ids(&output.waves[0]), vec!["n1", "n3"]);
        assert_eq!(output.waves[0].phase, Phase::Plan);
        assert_eq!(ids(&output.waves[1]), vec!["n2", "n0"]);
        assert_eq!(output.waves[1].phase, Phase::Execute);
        assert_eq!(output.command_ids.len(), 4);
    }

    #[test]
    fn test_inactive_nodes_rank_lower() {
        let mut nodes = scored(&[0.9, 0.5]);
        nodes[0].active = false;
        let output = plan_waves(&PlannerInput::new("run-1", nodes, 1.0));
        assert_eq!(ids(&output.waves[0]), vec!["n1"]);
        assert_eq!(ids(&output.waves[1]), vec!["n0"]);
    }

    #[test]
    fn test_equal_weights_keep_input_order() {
        let output = plan_waves(&PlannerInput::new("run-1", scored(&[0.5, 0.5, 0.5]), 5.0));
        assert_eq!(ids(&output.waves[0]), vec!["n0", "n1", "n2"]);
    }

    #[test]
    fn test_command_ids_use_position_in_group() {
        let output = plan_waves(&PlannerInput::new("run-1", scored(&[0.9, 0.8, 0.7]), 2.0));
        let command_ids: Vec<&str> = output.command_ids.iter().map(|c| c.as_str()).collect();
        assert_eq!(command_ids, vec!["n0:cmd:0", "n1:cmd:1", "n2:cmd:0"]);

        let unique: HashSet<&str> = command_ids.iter().copied().collect();
        assert_eq!(unique.len(), command_ids.len());

        let first = &output.commands[0];
        assert_eq!(first.action, "plan:transform");
        assert_eq!(first.actor, PLANNER_ACTOR);
        assert_eq!(output.commands_for(&output.waves[1]).count(), 1);
    }

    #[test]
    fn test_waves_are_staggered_with_growing_windows() {
        let now = Utc::now();
        let output = plan_waves_at(
            &PlannerInput::new("run-1", scored(&[0.9, 0.8, 0.7, 0.6, 0.5]), 2.0),
            now,
        );

        let windows: Vec<u32> = output.waves.iter().map(|w| w.window_minutes).collect();
        assert_eq!(windows, vec![4, 5, 4]);
        assert_eq!(output.waves[0].start_at, now);
        assert_eq!(output.waves[2].start_at, now + Duration::milliseconds(1_800));
        assert_eq!(output.waves[1].id, "run-1:wave:1");
    }

    #[test]
    fn test_oversized_stagger_saturates_instead_of_overflowing() {
        let now = Utc::now();
        let output = plan_waves_at(
            &PlannerInput::new("run-1", scored(&[0.9, 0.8, 0.7]), 1.0)
                .with_stagger_ms(10_000_000_000_000_000),
            now,
        );
        assert_eq!(output.waves.len(), 3);
        assert!(output.waves.iter().all(|w| w.start_at == now));

        let output = plan_waves_at(
            &PlannerInput::new("run-1", scored(&[0.9, 0.8, 0.7]), 1.0).with_stagger_ms(i64::MAX),
            now,
        );
        assert_eq!(output.waves[2].start_at, now);
    }

    #[test]
    fn test_one_telemetry_point_per_wave() {
        let output = plan_waves(&PlannerInput::new("run-1", scored(&[0.9, 0.8, 0.7]), 2.0));
        let keys: Vec<&str> = output.telemetry.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["mesh.plan", "mesh.execute"]);
        assert_eq!(output.telemetry[0].value, 2.0);
    }

    #[test]
    fn test_effective_concurrency_rounds_and_floors_at_one() {
        assert_eq!(effective_concurrency(0.0), 1);
        assert_eq!(effective_concurrency(0.4), 1);
        assert_eq!(effective_concurrency(2.6), 3);
        assert_eq!(effective_concurrency(-7.0), 1);
        assert_eq!(effective_concurrency(f64::NAN), 1);
    }

    #[test]
    fn test_plan_digest_is_deterministic_and_truncated() {
        let input = PlannerInput::new("run-1", scored(&[0.2, 0.4]), 1.0);
        let first = plan_waves(&input).plan_digest;
        let second = plan_waves(&input).plan_digest;
        assert_eq!(first, second);

        let sequence = "transform:n0:ingest|transform:n1:ingest";
        assert_eq!(first, sequence.repeat(3).chars().take(120).collect::<String>());
        assert_eq!(first.chars().count(), 117);

        let many = plan_waves(&PlannerInput::new("run-1", scored(&[0.5; 10]), 1.0));
        assert_eq!(many.plan_digest.chars().count(), PLAN_DIGEST_MAX_CHARS);
    }

    #[test]
    fn test_empty_input_plans_nothing() {
        let output = plan_waves(&PlannerInput::new("run-1", Vec::new(), 3.0));
        assert!(output.waves.is_empty());
        assert!(output.telemetry.is_empty());
        assert_eq!(output.plan_digest, "");
    }
}
