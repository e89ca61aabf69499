//! MeshRuntime - one planning cycle from validated input to tuned policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use mesh_config::MeshConfig;
use mesh_core::planner::{plan_waves_at, MeshPlannerOutput, PlannerInput, PLANNER_ACTOR};
use mesh_core::plugin::{PluginRegistry, RegistryError};
use mesh_core::policy::{apply_policy_tune, tune_policy, Policy, PolicyTune};
use mesh_core::topology::{build_runtime_graph, GraphBuildError, TopologySnapshot};
use mesh_core::types::{InputError, RunId, RuntimeInput, SignalClass, SignalEnvelope};
use mesh_stream::{
    calculate_observability_window_at, runtime_event_feed, BroadcastSignalBus, Cursor,
    EventStreamOptions, ObservabilityWindow, RuntimeEvent, SignalBus,
};

use crate::dispatcher::{DispatchReport, WaveDispatcher};

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid input: {0}")]
    Input(#[from] InputError),

    #[error("topology rejected: {0}")]
    Graph(#[from] GraphBuildError),

    #[error("plugin not registered: {0}")]
    UnknownPlugin(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result of one planning cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub output: MeshPlannerOutput,
    pub tune: PolicyTune,
    /// Policy in force for the next cycle.
    pub policy: Policy,
    pub snapshot: TopologySnapshot,
    /// Signals this cycle published, in publish order.
    pub signals: Vec<SignalEnvelope>,
    /// Aggregate over `signals`.
    pub window: ObservabilityWindow,
}

pub struct MeshRuntime {
    config: MeshConfig,
    registry: Arc<PluginRegistry>,
    bus: Arc<BroadcastSignalBus>,
    policy: RwLock<Policy>,
}

impl MeshRuntime {
    pub fn new(config: MeshConfig, registry: Arc<PluginRegistry>) -> Self {
        let bus = Arc::new(BroadcastSignalBus::new(config.stream.bus_capacity));
        let policy = RwLock::new(config.initial_policy());
        Self {
            config,
            registry,
            bus,
            policy,
        }
    }

    /// Runtime with a fresh registry whose mode follows `registry.strict`.
    pub fn from_config(config: MeshConfig) -> Self {
        let registry = Arc::new(PluginRegistry::new(config.registry.strict));
        Self::new(config, registry)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        self.registry.clone()
    }

    pub fn bus(&self) -> Arc<BroadcastSignalBus> {
        self.bus.clone()
    }

    pub async fn policy(&self) -> Policy {
        self.policy.read().await.clone()
    }

    /// Dispatcher bounded by the current policy's concurrency.
    pub async fn dispatcher(&self) -> WaveDispatcher {
        let bound = self.effective_concurrency(&*self.policy.read().await);
        WaveDispatcher::new(self.registry.clone(), bound)
    }

    pub async fn plan_cycle(&self, input: &RuntimeInput) -> Result<CycleReport, RuntimeError> {
        self.plan_cycle_at(input, Utc::now()).await
    }

    /// Run one cycle with `now` as the planning reference time.
    pub async fn plan_cycle_at(
        &self,
        input: &RuntimeInput,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, RuntimeError> {
        input.validate()?;
        self.check_plugins(input).await?;

        let run_id = RunId::generate();
        let span = tracing::info_span!("plan_cycle", run_id = %run_id);
        self.run_cycle(run_id, input, now).instrument(span).await
    }

    async fn run_cycle(
        &self,
        run_id: RunId,
        input: &RuntimeInput,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, RuntimeError> {
        let snapshot = build_runtime_graph(run_id.clone(), input.nodes.clone(), input.edges.clone())?;

        // Write lock spans plan and tune; concurrent cycles serialize here.
        let (current, concurrency, output, tune, next) = {
            let mut policy = self.policy.write().await;
            let current = policy.clone();
            let concurrency = self.effective_concurrency(&current);
            let planner_input =
                PlannerInput::new(run_id.clone(), input.nodes.clone(), f64::from(concurrency))
                    .with_edges(input.edges.clone())
                    .with_seed(self.config.planner.seed)
                    .with_stagger_ms(
                        i64::try_from(self.config.planner.stagger_ms).unwrap_or(i64::MAX),
                    );
            let output = plan_waves_at(&planner_input, now);

            let tune = tune_policy(&current, &snapshot, &output.waves);
            let next = apply_policy_tune(&current, &tune);
            *policy = next.clone();
            (current, concurrency, output, tune, next)
        };

        let mut signals = Vec::with_capacity(output.waves.len() + 1);
        for wave in &output.waves {
            signals.push(
                SignalEnvelope::new(
                    wave.phase,
                    PLANNER_ACTOR,
                    SignalClass::Wave,
                    wave.len() as i64,
                    json!({
                        "waveId": wave.id,
                        "nodes": wave.nodes,
                        "windowMinutes": wave.window_minutes,
                    }),
                )
                .with_created_at(wave.start_at),
            );
        }
        signals.push(
            SignalEnvelope::new(
                tune.target_phase,
                next.id.clone(),
                SignalClass::Policy,
                tune.pressure.round() as i64,
                json!({
                    "from": current.max_concurrency,
                    "to": next.max_concurrency,
                    "pressure": tune.pressure,
                }),
            )
            .with_created_at(now),
        );

        let window = calculate_observability_window_at(&signals, now);
        for signal in &signals {
            if let Err(err) = self.bus.publish(signal.clone()).await {
                tracing::warn!(error = %err, "signal publish failed");
            }
        }

        tracing::info!(
            waves = output.waves.len(),
            commands = output.commands.len(),
            concurrency,
            next_concurrency = next.max_concurrency,
            digest = %output.plan_digest,
            "plan cycle completed"
        );

        Ok(CycleReport {
            output,
            tune,
            policy: next,
            snapshot,
            signals,
            window,
        })
    }

    /// Merge a cycle's signals with the plugin events of its dispatched
    /// waves into one time-ordered feed, paced by the `stream` config.
    pub async fn event_feed(
        &self,
        report: &CycleReport,
        dispatches: &[DispatchReport],
        token: CancellationToken,
    ) -> Vec<Cursor<RuntimeEvent>> {
        let options = EventStreamOptions::new(self.config.stream.window_size)
            .with_jitter(Duration::from_millis(self.config.stream.jitter_ms));
        let plugin_events = dispatches
            .iter()
            .flat_map(|dispatch| dispatch.events.iter().cloned())
            .collect();
        let feed: Vec<_> =
            runtime_event_feed(report.signals.clone(), plugin_events, options, token)
                .collect()
                .await;
        tracing::debug!(
            run_id = %report.output.run_id,
            events = feed.len(),
            "runtime feed merged"
        );
        feed
    }

    async fn check_plugins(&self, input: &RuntimeInput) -> Result<(), RuntimeError> {
        if self.registry.is_closed() {
            return Err(RegistryError::Closed.into());
        }
        let manifests = self.registry.manifest_snapshot().await;
        for plugin_id in &input.plugin_ids {
            let known = manifests
                .iter()
                .any(|m| m.plugin_id == *plugin_id || m.name == plugin_id.as_str());
            if !known {
                tracing::warn!(plugin_id = %plugin_id, "plan cycle rejected: plugin not registered");
                return Err(RuntimeError::UnknownPlugin(plugin_id.to_string()));
            }
        }
        Ok(())
    }

    fn effective_concurrency(&self, policy: &Policy) -> u8 {
        if policy.max_concurrency == 0 {
            self.config.planner.max_concurrency
        } else {
            policy.max_concurrency
        }
    }
}
