//! Wave dispatch: runs a wave's commands through the plugin registry with a
//! bounded number in flight.

use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use mesh_core::planner::{Command, Wave};
use mesh_core::plugin::{PluginContext, PluginInput, PluginRegistry};
use mesh_core::types::{CommandId, NodeId, WaveId};
use mesh_stream::PluginEvent;

/// Result of running one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub command_id: CommandId,
    pub node_id: NodeId,
    pub succeeded: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Everything one wave produced. Outcomes follow the wave's command order;
/// events follow completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub wave_id: WaveId,
    pub outcomes: Vec<CommandOutcome>,
    pub events: Vec<PluginEvent>,
}

impl DispatchReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded).count()
    }
}

pub struct WaveDispatcher {
    registry: Arc<PluginRegistry>,
    max_concurrency: usize,
}

impl WaveDispatcher {
    /// A bound of 0 is treated as 1.
    pub fn new(registry: Arc<PluginRegistry>, max_concurrency: u8) -> Self {
        Self {
            registry,
            max_concurrency: usize::from(max_concurrency.max(1)),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every command of `wave` through `plugin_name`.
    ///
    /// Commands listed in the wave but absent from `commands` are skipped.
    /// Once `token` fires, in-flight and remaining commands come back as
    /// cancelled failures.
    pub async fn dispatch(
        &self,
        wave: &Wave,
        commands: &[Command],
        plugin_name: &str,
        token: CancellationToken,
    ) -> DispatchReport {
        let mut pending = wave
            .command_ids
            .iter()
            .filter_map(|id| commands.iter().find(|c| &c.command_id == id))
            .enumerate();

        let mut in_flight = FuturesUnordered::new();
        let mut completed = Vec::with_capacity(wave.command_ids.len());
        let mut events = Vec::with_capacity(wave.command_ids.len());

        tracing::info!(
            wave = %wave.id,
            phase = %wave.phase,
            commands = wave.command_ids.len(),
            max_concurrency = self.max_concurrency,
            "wave dispatch started"
        );

        loop {
            while in_flight.len() < self.max_concurrency {
                match pending.next() {
                    Some((index, command)) => in_flight.push(self.run_command(
                        index,
                        wave,
                        command,
                        plugin_name,
                        token.clone(),
                    )),
                    None => break,
                }
            }

            let Some((index, outcome)) = in_flight.next().await else {
                break;
            };
            events.push(PluginEvent {
                plugin: plugin_name.to_string(),
                run_id: wave.run_id.clone(),
                command_id: Some(outcome.command_id.clone()),
                succeeded: outcome.succeeded,
                message: outcome.error.clone(),
                at: Utc::now(),
            });
            completed.push((index, outcome));
        }

        completed.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<CommandOutcome> = completed.into_iter().map(|(_, o)| o).collect();
        let report = DispatchReport {
            wave_id: wave.id.clone(),
            outcomes,
            events,
        };

        tracing::info!(
            wave = %wave.id,
            succeeded = report.outcomes.len() - report.failed(),
            failed = report.failed(),
            "wave dispatch finished"
        );
        report
    }

    async fn run_command(
        &self,
        index: usize,
        wave: &Wave,
        command: &Command,
        plugin_name: &str,
        token: CancellationToken,
    ) -> (usize, CommandOutcome) {
        let payload = match serde_json::to_value(command) {
            Ok(payload) => payload,
            Err(err) => {
                return (
                    index,
                    failed_outcome(command, format!("encode command: {}", err)),
                )
            }
        };
        let ctx = PluginContext::new(wave.run_id.clone(), wave.phase)
            .with_attributes(json!({
                "waveId": wave.id,
                "nodeId": command.node_id,
                "windowMinutes": wave.window_minutes,
            }))
            .with_cancellation_token(token);

        let outcome = match self
            .registry
            .run_by_name(plugin_name, PluginInput::new(payload), ctx)
            .await
        {
            Ok(output) => CommandOutcome {
                command_id: command.command_id.clone(),
                node_id: command.node_id.clone(),
                succeeded: true,
                output: Some(output),
                error: None,
            },
            Err(err) => failed_outcome(command, err.to_string()),
        };
        (index, outcome)
    }
}

fn failed_outcome(command: &Command, error: String) -> CommandOutcome {
    CommandOutcome {
        command_id: command.command_id.clone(),
        node_id: command.node_id.clone(),
        succeeded: false,
        output: None,
        error: Some(error),
    }
}
