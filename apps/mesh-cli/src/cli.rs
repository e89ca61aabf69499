use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use mesh_config::{load_config, MeshConfig, ObservabilityConfig};
use mesh_core::planner::{plan_waves, MeshPlannerOutput, PlannerInput};
use mesh_core::plugin::{
    catalog_health, normalize_catalog, reconcile_catalog, CatalogEntry, CatalogHealth,
    PluginManifest,
};
use mesh_core::policy::tune_policy;
use mesh_core::topology::build_runtime_graph;
use mesh_core::types::{RunId, RuntimeInput};
use mesh_runtime::init_tracing_if_needed;

#[derive(Debug, Parser)]
#[command(name = "mesh", about = "Recovery mesh planner CLI")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a runtime input and print its wave plan as JSON
    Plan(PlanArgs),
    /// Normalize and reconcile plugin manifests and report catalog health
    Catalog(CatalogArgs),
}

#[derive(Debug, Args, Clone)]
struct PlanArgs {
    #[arg(long, default_value = "configs/mesh.yaml")]
    config: PathBuf,
    /// RuntimeInput JSON file
    #[arg(long)]
    input: PathBuf,
    /// Run id to stamp on the plan; generated when omitted
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Args, Clone)]
struct CatalogArgs {
    /// JSON array of local plugin manifests
    #[arg(long)]
    manifests: PathBuf,
    /// JSON array of remote manifests to reconcile against
    #[arg(long)]
    remote: Option<PathBuf>,
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CatalogReport {
    entries: Vec<CatalogEntry>,
    health: CatalogHealth,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Plan(args) => {
                let config = load_config(&args.config)
                    .with_context(|| format!("load config {}", args.config.display()))?;
                init_tracing_if_needed(&config.observability);
                let input: RuntimeInput = read_json(&args.input)?;
                let run_id = args.run_id.map(RunId::from).unwrap_or_else(RunId::generate);
                let output = plan(&config, &input, run_id)?;
                print_json(&output, args.pretty)
            }
            Command::Catalog(args) => {
                init_tracing_if_needed(&ObservabilityConfig::default());
                let local: Vec<PluginManifest> = read_json(&args.manifests)?;
                let remote: Vec<PluginManifest> = match &args.remote {
                    Some(path) => read_json(path)?,
                    None => Vec::new(),
                };
                let report = catalog(local, remote)?;
                print_json(&report, args.pretty)
            }
        }
    }
}

fn plan(
    config: &MeshConfig,
    input: &RuntimeInput,
    run_id: RunId,
) -> anyhow::Result<MeshPlannerOutput> {
    input.validate().context("invalid runtime input")?;
    let snapshot = build_runtime_graph(run_id.clone(), input.nodes.clone(), input.edges.clone())
        .context("topology rejected")?;

    let policy = config.initial_policy();
    let planner_input = PlannerInput::new(run_id, input.nodes.clone(), f64::from(config.planner.max_concurrency))
        .with_edges(input.edges.clone())
        .with_seed(config.planner.seed)
        .with_stagger_ms(i64::try_from(config.planner.stagger_ms).unwrap_or(i64::MAX));
    let output = plan_waves(&planner_input);

    let tune = tune_policy(&policy, &snapshot, &output.waves);
    tracing::info!(
        waves = output.waves.len(),
        next_concurrency = tune.target_concurrency,
        pressure = tune.pressure,
        "plan ready"
    );
    Ok(output)
}

fn catalog(
    local: Vec<PluginManifest>,
    remote: Vec<PluginManifest>,
) -> anyhow::Result<CatalogReport> {
    for manifest in local.iter().chain(remote.iter()) {
        manifest
            .validate()
            .with_context(|| format!("invalid manifest '{}'", manifest.name))?;
    }
    let merged = reconcile_catalog(&local, &remote);
    let entries = normalize_catalog(merged, Utc::now());
    let health = catalog_health(&entries);
    Ok(CatalogReport { entries, health })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", rendered);
    Ok(())
}
