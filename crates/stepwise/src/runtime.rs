//! Stepwise runtime
//!
//! Wires configuration, the component registry, the store, the engine and
//! the timer worker into one handle.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stepwise_core::{Component, Result, StepError, StepwiseConfig, Trigger};
use stepwise_runtime::{
    Engine, MemoryStore, PgStore, Registry, Store, TimerWorker, TimerWorkerConfig, WorkflowGraph,
};

/// Prelude module for common imports.
pub mod prelude {
    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;

    pub use stepwise_core::{
        outputs_on, ActionCall, ActionDefinition, ActionOrigin, Component, ExecutionContext,
        ExecutionResult, ExecutionState, ExecutionStateContext, MetadataContext, NodeExecution,
        Outputs, ParameterDef, QueueItem, RequestContext, Result, StepError, StepwiseConfig,
        Trigger, WorkflowContext, DEFAULT_CHANNEL,
    };
    pub use stepwise_runtime::{Edge, Engine, NodeSpec, Registry, WorkflowGraph};

    pub use crate::{Stepwise, StepwiseBuilder};
}

/// A running stepwise engine plus its timer worker.
pub struct Stepwise<S: Store = MemoryStore> {
    config: StepwiseConfig,
    engine: Arc<Engine<S>>,
    shutdown: CancellationToken,
}

impl Stepwise {
    /// Create a new builder.
    pub fn builder() -> StepwiseBuilder {
        StepwiseBuilder::new()
    }
}

impl<S: Store> Stepwise<S> {
    pub fn config(&self) -> &StepwiseConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<Engine<S>> {
        &self.engine
    }

    /// Register a workflow after start-up.
    pub async fn register_workflow(&self, graph: WorkflowGraph) -> Result<()> {
        self.engine.register_workflow(graph).await
    }

    /// Spawn the timer worker. It stops when [`Stepwise::shutdown`] is called.
    pub fn spawn_timers(&self) -> JoinHandle<()> {
        let worker = TimerWorker::new(
            self.engine.clone(),
            TimerWorkerConfig::from(&self.config.engine),
        );
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    }

    /// Run the timer worker until ctrl-c or [`Stepwise::shutdown`].
    pub async fn run(self) -> Result<()> {
        let workflows = self.engine.workflow_ids().await.len();
        tracing::info!(
            workflows = workflows,
            "Stepwise runtime starting"
        );

        let timers = self.spawn_timers();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("Received shutdown notification");
            }
        }

        self.shutdown.cancel();
        timers
            .await
            .map_err(|e| StepError::Internal(format!("timer worker panicked: {}", e)))?;

        tracing::info!("Stepwise runtime stopped");
        Ok(())
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Builder for configuring the stepwise runtime.
pub struct StepwiseBuilder {
    config: Option<StepwiseConfig>,
    registry: Registry,
    workflows: Vec<WorkflowGraph>,
}

impl StepwiseBuilder {
    /// Create a builder holding the built-in components and triggers.
    pub fn new() -> Self {
        Self {
            config: None,
            registry: Registry::with_builtins(),
            workflows: Vec::new(),
        }
    }

    /// Set the configuration. Defaults to [`StepwiseConfig::default`].
    pub fn config(mut self, config: StepwiseConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn component<C: Component>(mut self, component: C) -> Self {
        self.registry.register_component(component);
        self
    }

    pub fn trigger<T: Trigger>(mut self, trigger: T) -> Self {
        self.registry.register_trigger(trigger);
        self
    }

    /// Get mutable access to the registry.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Add a workflow to register at build time.
    pub fn workflow(mut self, graph: WorkflowGraph) -> Self {
        self.workflows.push(graph);
        self
    }

    /// Build a runtime backed by the in-memory store.
    pub async fn build(self) -> Result<Stepwise<MemoryStore>> {
        self.finish(MemoryStore::new()).await
    }

    /// Build a runtime backed by PostgreSQL, applying the internal schema.
    ///
    /// Requires a `[database]` section.
    pub async fn connect(self) -> Result<Stepwise<PgStore>> {
        let config = self.config.clone().unwrap_or_default();
        let database = config
            .database
            .as_ref()
            .ok_or_else(|| StepError::Config("database configuration is required".into()))?;

        let store = PgStore::connect(database).await?;
        store.migrate().await?;
        tracing::info!("Connected to database");

        self.finish(store).await
    }

    async fn finish<S: Store>(self, store: S) -> Result<Stepwise<S>> {
        let config = self.config.unwrap_or_default();
        let engine = Engine::new(Arc::new(self.registry), Arc::new(store))
            .with_config(config.engine.clone());

        for graph in self.workflows {
            engine.register_workflow(graph).await?;
        }

        Ok(Stepwise {
            config,
            engine: Arc::new(engine),
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for StepwiseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_runtime::{Edge, NodeSpec};

    fn graph() -> WorkflowGraph {
        WorkflowGraph::new("deploy")
            .with_node(NodeSpec::trigger("push", "start", json!({})))
            .with_node(NodeSpec::component("build", "noop", json!({})))
            .with_edge(Edge::new("push", "build"))
    }

    #[tokio::test]
    async fn test_build_registers_workflows() {
        let stepwise = Stepwise::builder().workflow(graph()).build().await.unwrap();
        assert!(stepwise.engine().workflow("deploy").await.is_ok());
        assert_eq!(stepwise.config().engine.timer_batch_size, 100);
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_workflow() {
        let broken = WorkflowGraph::new("broken")
            .with_node(NodeSpec::component("x", "doesNotExist", json!({})));
        let result = Stepwise::builder().workflow(broken).build().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_requires_database() {
        let result = Stepwise::builder().connect().await;
        assert!(matches!(result, Err(StepError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = StepwiseConfig::parse_toml("[engine]\ntimer_poll_interval_ms = 10\n").unwrap();
        let stepwise = Stepwise::builder().config(config).build().await.unwrap();
        let token = stepwise.shutdown_token();

        let handle = tokio::spawn(stepwise.run());
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
