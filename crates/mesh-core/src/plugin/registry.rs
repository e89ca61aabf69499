//! Plugin registry
//!
//! Resolves plugin names to executable behaviour. The map is guarded by an
//! async `RwLock`; dispatch clones the plugin handle out of the lock before
//! awaiting so long-running plugins never block registration.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::manifest::{ManifestError, PluginManifest};
use crate::types::{Phase, RunId};

/// Error raised by a plugin's own code.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("plugin already exists: {0}")]
    Duplicate(String),

    #[error("unknown plugin: {0}")]
    Unknown(String),

    #[error("plugin '{name}' failed: {source}")]
    RunFailure {
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("plugin '{name}' requires unregistered dependency '{dependency}'")]
    MissingDependency { name: String, dependency: String },

    #[error("plugin dependency cycle among: {0}")]
    DependencyCycle(String),

    #[error("plugin '{0}' run cancelled")]
    Cancelled(String),

    #[error("registry is closed")]
    Closed,

    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("plugin '{name}' payload could not be converted: {message}")]
    Codec { name: String, message: String },
}

/// Input handed to a plugin run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginInput {
    #[serde(default)]
    pub payload: Value,
}

impl PluginInput {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Get a payload value by JSON pointer (e.g. "/node/id").
    pub fn get(&self, pointer: &str) -> Option<&Value> {
        self.payload.pointer(pointer)
    }
}

/// Execution context for a plugin run.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub run_id: RunId,
    pub phase: Phase,
    /// Free-form attributes from the caller (command id, node id, ...).
    pub attributes: Value,
    /// Cooperative cancellation; the registry aborts the run when it fires.
    pub cancellation_token: CancellationToken,
}

impl PluginContext {
    pub fn new(run_id: impl Into<RunId>, phase: Phase) -> Self {
        Self {
            run_id: run_id.into(),
            phase,
            attributes: Value::Null,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// A pluggable behaviour unit.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> &PluginManifest;

    async fn run(&self, input: PluginInput, ctx: PluginContext) -> Result<Value, PluginError>;

    /// Release resources. Called once by `PluginRegistry::close`.
    async fn dispose(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Plugin built from a manifest and an async closure.
pub struct FnPlugin<F> {
    manifest: PluginManifest,
    handler: F,
}

impl<F> FnPlugin<F> {
    pub fn new(manifest: PluginManifest, handler: F) -> Self {
        Self { manifest, handler }
    }
}

#[async_trait]
impl<F, Fut> Plugin for FnPlugin<F>
where
    F: Fn(PluginInput, PluginContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, PluginError>> + Send + 'static,
{
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn run(&self, input: PluginInput, ctx: PluginContext) -> Result<Value, PluginError> {
        (self.handler)(input, ctx).await
    }
}

struct RegisteredPlugin {
    manifest: PluginManifest,
    plugin: Arc<dyn Plugin>,
}

/// Name-keyed plugin registry.
pub struct PluginRegistry {
    strict: bool,
    plugins: RwLock<HashMap<String, RegisteredPlugin>>,
    closed: AtomicBool,
}

impl PluginRegistry {
    /// Create a registry. In strict mode `add` refuses to overwrite a name.
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            plugins: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn has(&self, name: &str) -> bool {
        self.plugins.read().await.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .await
            .get(name)
            .map(|entry| entry.plugin.clone())
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }

    /// Register a plugin under its manifest name.
    pub async fn add(&self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        if self.is_closed() {
            return Err(RegistryError::Closed);
        }
        let manifest = plugin.manifest().clone();
        manifest.validate()?;

        let mut plugins = self.plugins.write().await;
        // `close` may have drained the map while we waited for the lock.
        if self.is_closed() {
            return Err(RegistryError::Closed);
        }
        if self.strict && plugins.contains_key(&manifest.name) {
            return Err(RegistryError::Duplicate(manifest.name));
        }

        tracing::info!(
            plugin = %manifest.name,
            version = %manifest.version,
            priority = manifest.priority,
            "plugin registered"
        );
        plugins.insert(manifest.name.clone(), RegisteredPlugin { manifest, plugin });
        Ok(())
    }

    /// Remove a plugin without disposing it.
    pub async fn remove(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .write()
            .await
            .remove(name)
            .map(|entry| entry.plugin)
    }

    /// Run a plugin by name. Plugin errors, panics and cancellation all come
    /// back as `RegistryError` values.
    pub async fn run_by_name(
        &self,
        name: &str,
        input: PluginInput,
        ctx: PluginContext,
    ) -> Result<Value, RegistryError> {
        if self.is_closed() {
            return Err(RegistryError::Closed);
        }

        let plugin = {
            let plugins = self.plugins.read().await;
            let entry = plugins
                .get(name)
                .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
            if let Some(dependency) = entry
                .manifest
                .dependencies
                .iter()
                .find(|dep| !plugins.contains_key(dep.as_str()))
            {
                return Err(RegistryError::MissingDependency {
                    name: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
            entry.plugin.clone()
        };

        let token = ctx.cancellation_token.clone();
        if token.is_cancelled() {
            return Err(RegistryError::Cancelled(name.to_string()));
        }

        tracing::debug!(plugin = %name, run_id = %ctx.run_id, phase = %ctx.phase, "plugin run started");
        let run = AssertUnwindSafe(plugin.run(input, ctx)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::warn!(plugin = %name, "plugin run cancelled");
                return Err(RegistryError::Cancelled(name.to_string()));
            }
            outcome = run => outcome,
        };

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => {
                tracing::warn!(plugin = %name, error = %source, "plugin run failed");
                Err(RegistryError::RunFailure {
                    name: name.to_string(),
                    source,
                })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(plugin = %name, error = %message, "plugin run panicked");
                Err(RegistryError::RunFailure {
                    name: name.to_string(),
                    source: PluginError::new(format!("panicked: {}", message)),
                })
            }
        }
    }

    /// Typed wrapper over `run_by_name`; payloads travel as JSON.
    pub async fn run_typed<I, O>(
        &self,
        name: &str,
        input: &I,
        ctx: PluginContext,
    ) -> Result<O, RegistryError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let codec_error = |err: serde_json::Error| RegistryError::Codec {
            name: name.to_string(),
            message: err.to_string(),
        };
        let payload = serde_json::to_value(input).map_err(codec_error)?;
        let output = self
            .run_by_name(name, PluginInput::new(payload), ctx)
            .await?;
        serde_json::from_value(output).map_err(codec_error)
    }

    /// Manifests of every registered plugin, sorted by name.
    pub async fn manifest_snapshot(&self) -> Vec<PluginManifest> {
        let mut manifests: Vec<PluginManifest> = self
            .plugins
            .read()
            .await
            .values()
            .map(|entry| entry.manifest.clone())
            .collect();
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        manifests
    }

    /// Registered names ordered so every plugin follows its dependencies.
    /// Ties are broken by name.
    pub async fn dependency_order(&self) -> Result<Vec<String>, RegistryError> {
        let manifests = self.manifest_snapshot().await;
        let known: HashMap<&str, &PluginManifest> =
            manifests.iter().map(|m| (m.name.as_str(), m)).collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for manifest in &manifests {
            in_degree.entry(manifest.name.as_str()).or_insert(0);
            for dep in &manifest.dependencies {
                if !known.contains_key(dep.as_str()) {
                    return Err(RegistryError::MissingDependency {
                        name: manifest.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                *in_degree.entry(manifest.name.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(manifest.name.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(manifests.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != manifests.len() {
            let mut stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(name, _)| *name)
                .collect();
            stuck.sort_unstable();
            return Err(RegistryError::DependencyCycle(stuck.join(", ")));
        }

        Ok(order)
    }

    /// Dispose every plugin and clear the registry. Disposal errors are
    /// logged and swallowed. The registry rejects further use afterwards.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<(String, RegisteredPlugin)> =
            self.plugins.write().await.drain().collect();
        let disposals = drained.iter().map(|(name, entry)| async move {
            if let Err(err) = entry.plugin.dispose().await {
                tracing::warn!(plugin = %name, error = %err, "plugin dispose failed");
            }
        });
        join_all(disposals).await;
        tracing::info!(plugins = drained.len(), "plugin registry closed");
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn echo(name: &str) -> Arc<dyn Plugin> {
        Arc::new(FnPlugin::new(
            PluginManifest::new(name, "1.0.0"),
            |input: PluginInput, _ctx: PluginContext| async move { Ok::<Value, PluginError>(input.payload) },
        ))
    }

    fn constant(name: &str, value: Value) -> Arc<dyn Plugin> {
        Arc::new(FnPlugin::new(
            PluginManifest::new(name, "2.0.0"),
            move |_input: PluginInput, _ctx: PluginContext| {
                let value = value.clone();
                async move { Ok::<Value, PluginError>(value) }
            },
        ))
    }

    fn ctx() -> PluginContext {
        PluginContext::new("run-1", Phase::Execute)
    }

    struct DisposeCounter {
        manifest: PluginManifest,
        disposed: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Plugin for DisposeCounter {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        async fn run(&self, _input: PluginInput, _ctx: PluginContext) -> Result<Value, PluginError> {
            Ok(Value::Null)
        }

        async fn dispose(&self) -> Result<(), PluginError> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PluginError::new("dispose exploded"));
            }
            Ok(())
        }
    }

    struct PanicPlugin {
        manifest: PluginManifest,
    }

    #[async_trait]
    impl Plugin for PanicPlugin {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        async fn run(&self, _input: PluginInput, _ctx: PluginContext) -> Result<Value, PluginError> {
            panic!("boom");
        }
    }

    #[test]
    fn test_strict_registry_rejects_duplicate_names() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::new(true);
            registry.add(echo("snapshot")).await.expect("first add");
            let err = registry.add(echo("snapshot")).await.unwrap_err();
            assert!(matches!(err, RegistryError::Duplicate(name) if name == "snapshot"));
        });
    }

    #[test]
    fn test_lenient_registry_replaces_existing_plugin() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::new(false);
            registry.add(echo("snapshot")).await.expect("first add");
            registry
                .add(constant("snapshot", json!("replaced")))
                .await
                .expect("second add");

            assert_eq!(registry.len().await, 1);
            let output = registry
                .run_by_name("snapshot", PluginInput::new(json!("original")), ctx())
                .await
                .expect("run");
            assert_eq!(output, json!("replaced"));
            assert_eq!(registry.manifest_snapshot().await[0].version, "2.0.0");
        });
    }

    #[test]
    fn test_run_unknown_plugin_fails() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            let err = registry
                .run_by_name("ghost", PluginInput::default(), ctx())
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "unknown plugin: ghost");
        });
    }

    #[test]
    fn test_plugin_errors_are_wrapped() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            registry
                .add(Arc::new(FnPlugin::new(
                    PluginManifest::new("flaky", "1.0.0"),
                    |_input: PluginInput, _ctx: PluginContext| async move {
                        Err::<Value, _>(PluginError::new("disk full"))
                    },
                )))
                .await
                .expect("add");

            let err = registry
                .run_by_name("flaky", PluginInput::default(), ctx())
                .await
                .unwrap_err();
            match err {
                RegistryError::RunFailure { name, source } => {
                    assert_eq!(name, "flaky");
                    assert_eq!(source.message, "disk full");
                }
                other => panic!("expected run failure, got {other:?}"),
            }
        });
    }

    #[test]
    fn test_plugin_panics_are_wrapped() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            registry
                .add(Arc::new(PanicPlugin {
                    manifest: PluginManifest::new("panicky", "1.0.0"),
                }))
                .await
                .expect("add");

            let err = registry
                .run_by_name("panicky", PluginInput::default(), ctx())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                RegistryError::RunFailure { ref source, .. } if source.message.contains("boom")
            ));
        });
    }

    #[test]
    fn test_cancelled_context_short_circuits() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            registry.add(echo("snapshot")).await.expect("add");
            let token = CancellationToken::new();
            token.cancel();

            let err = registry
                .run_by_name(
                    "snapshot",
                    PluginInput::default(),
                    ctx().with_cancellation_token(token),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, RegistryError::Cancelled(_)));
        });
    }

    #[test]
    fn test_missing_dependency_blocks_run() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            registry
                .add(Arc::new(FnPlugin::new(
                    PluginManifest::new("restore", "1.0.0")
                        .with_dependencies(vec!["snapshot".to_string()]),
                    |_input: PluginInput, _ctx: PluginContext| async move { Ok::<Value, PluginError>(Value::Null) },
                )))
                .await
                .expect("add");

            let err = registry
                .run_by_name("restore", PluginInput::default(), ctx())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                RegistryError::MissingDependency { ref dependency, .. } if dependency == "snapshot"
            ));

            registry.add(echo("snapshot")).await.expect("add dependency");
            assert!(registry
                .run_by_name("restore", PluginInput::default(), ctx())
                .await
                .is_ok());
        });
    }

    #[test]
    fn test_run_typed_round_trips_through_json() {
        #[derive(Serialize)]
        struct Request {
            node: String,
        }
        #[derive(Deserialize, Debug, PartialEq)]
        struct Response {
            node: String,
        }

        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            registry.add(echo("echo")).await.expect("add");
            let response: Response = registry
                .run_typed(
                    "echo",
                    &Request {
                        node: "db-1".to_string(),
                    },
                    ctx(),
                )
                .await
                .expect("typed run");
            assert_eq!(
                response,
                Response {
                    node: "db-1".to_string()
                }
            );
        });
    }

    #[test]
    fn test_dependency_order_follows_dependencies() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            let plugin = |name: &str, deps: &[&str]| -> Arc<dyn Plugin> {
                Arc::new(FnPlugin::new(
                    PluginManifest::new(name, "1.0.0")
                        .with_dependencies(deps.iter().map(|d| d.to_string()).collect()),
                    |_input: PluginInput, _ctx: PluginContext| async move { Ok::<Value, PluginError>(Value::Null) },
                ))
            };
            registry.add(plugin("verify", &["restore"])).await.unwrap();
            registry.add(plugin("restore", &["snapshot"])).await.unwrap();
            registry.add(plugin("snapshot", &[])).await.unwrap();
            registry.add(plugin("audit", &[])).await.unwrap();

            let order = registry.dependency_order().await.expect("order");
            assert_eq!(order, vec!["audit", "snapshot", "restore", "verify"]);
        });
    }

    #[test]
    fn test_dependency_order_reports_mutual_dependency() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            for (name, dep) in [("restore", "verify"), ("verify", "restore"), ("audit", "")] {
                let deps = if dep.is_empty() { vec![] } else { vec![dep.to_string()] };
                registry
                    .add(Arc::new(FnPlugin::new(
                        PluginManifest::new(name, "1.0.0").with_dependencies(deps),
                        |_input: PluginInput, _ctx: PluginContext| async move { Ok::<Value, PluginError>(Value::Null) },
                    )))
                    .await
                    .expect("add");
            }

            let err = registry.dependency_order().await.unwrap_err();
            assert!(matches!(err, RegistryError::DependencyCycle(ref names) if names == "restore, verify"));
        });
    }

    #[test]
    fn test_dependency_order_reports_unregistered_dependency() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            registry.add(echo("snapshot")).await.expect("add");
            registry
                .add(Arc::new(FnPlugin::new(
                    PluginManifest::new("restore", "1.0.0")
                        .with_dependencies(vec!["snapshot".to_string(), "quiesce".to_string()]),
                    |_input: PluginInput, _ctx: PluginContext| async move { Ok::<Value, PluginError>(Value::Null) },
                )))
                .await
                .expect("add");

            let err = registry.dependency_order().await.unwrap_err();
            assert!(matches!(
                err,
                RegistryError::MissingDependency { ref name, ref dependency }
                    if name == "restore" && dependency == "quiesce"
            ));
        });
    }

    #[test]
    fn test_add_waiting_on_lock_fails_once_closed() {
        use tokio_test::{assert_pending, assert_ready};

        let registry = PluginRegistry::default();
        let guard = registry.plugins.try_read().expect("uncontended");

        let mut add = tokio_test::task::spawn(registry.add(echo("late")));
        assert_pending!(add.poll());

        registry.closed.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(add.is_woken());
        let result = assert_ready!(add.poll());
        assert!(matches!(result, Err(RegistryError::Closed)));
        drop(add);
        assert!(registry.plugins.try_read().expect("unlocked").is_empty());
    }

    #[test]
    fn test_close_disposes_plugins_and_swallows_errors() {
        tokio_test::block_on(async {
            let registry = PluginRegistry::default();
            let disposed = Arc::new(AtomicUsize::new(0));
            for (name, fail) in [("a", false), ("b", true)] {
                registry
                    .add(Arc::new(DisposeCounter {
                        manifest: PluginManifest::new(name, "1.0.0"),
                        disposed: disposed.clone(),
                        fail,
                    }))
                    .await
                    .expect("add");
            }

            registry.close().await;
            registry.close().await;

            assert_eq!(disposed.load(Ordering::SeqCst), 2);
            assert!(registry.is_empty().await);
            assert!(matches!(
                registry.add(echo("late")).await,
                Err(RegistryError::Closed)
            ));
            assert!(matches!(
                registry
                    .run_by_name("a", PluginInput::default(), ctx())
                    .await,
                Err(RegistryError::Closed)
            ));
        });
    }
}
