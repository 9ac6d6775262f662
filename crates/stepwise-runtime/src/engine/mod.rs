//! Workflow engine: routes payloads between nodes and drives executions.
//!
//! Three paths mutate executions:
//!
//! - the queue path (`trigger`, `enqueue`), which starts executions, feeds
//!   subscribers and collects fan-in inputs
//! - the timer path (`fire_due`), which replays scheduled action calls
//! - the user path (`invoke_action`, `reevaluate`)
//!
//! Every mutation of one execution holds that execution's lock. Errors on the
//! queue and timer paths fail the execution; errors on the user path are
//! returned and leave the execution untouched.

mod dispatch;
mod locks;

pub use locks::KeyedLocks;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use stepwise_core::config::EngineConfig;
use stepwise_core::{
    outputs_on, ActionCall, ActionOrigin, Clock, Component, NodeExecution, QueueItem, Result,
    StepError, SystemClock, DEFAULT_CHANNEL,
};

use crate::graph::{NodeKind, NodeSpec, WorkflowGraph};
use crate::registry::Registry;
use crate::store::{MemoryStore, Store};
use dispatch::Work;

/// Executes workflow graphs against a store.
pub struct Engine<S: Store = MemoryStore> {
    registry: Arc<Registry>,
    store: Arc<S>,
    graphs: RwLock<HashMap<String, Arc<WorkflowGraph>>>,
    locks: KeyedLocks,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Engine<MemoryStore> {
    /// Create an engine backed by a fresh in-memory store.
    pub fn in_memory(registry: Registry) -> Self {
        Self::new(Arc::new(registry), Arc::new(MemoryStore::new()))
    }
}

impl<S: Store> Engine<S> {
    pub fn new(registry: Arc<Registry>, store: Arc<S>) -> Self {
        Self {
            registry,
            store,
            graphs: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate a graph, run `setup` for each node and make it routable.
    pub async fn register_workflow(&self, graph: WorkflowGraph) -> Result<()> {
        graph.validate(&self.registry)?;

        for node in &graph.nodes {
            let setup = match node.kind {
                NodeKind::Component => self.component_for(node)?.setup(&node.configuration),
                NodeKind::Trigger => self
                    .registry
                    .trigger(&node.reference)
                    .ok_or_else(|| StepError::NotFound(format!("trigger '{}'", node.reference)))?
                    .setup(&node.configuration),
            };
            setup.map_err(|e| e.for_node(&node.id))?;
        }

        tracing::info!(
            workflow_id = %graph.id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Registered workflow"
        );

        self.graphs
            .write()
            .await
            .insert(graph.id.clone(), Arc::new(graph));
        Ok(())
    }

    pub async fn workflow(&self, workflow_id: &str) -> Result<Arc<WorkflowGraph>> {
        self.graphs
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StepError::NotFound(format!("workflow '{}'", workflow_id)))
    }

    /// Ids of all registered workflows, sorted.
    pub async fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graphs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Start a new wave at a trigger node.
    ///
    /// Returns the root event id, or `None` when the trigger declined the event.
    pub async fn trigger(
        &self,
        workflow_id: &str,
        trigger_node_id: &str,
        event: serde_json::Value,
    ) -> Result<Option<Uuid>> {
        let graph = self.workflow(workflow_id).await?;
        let spec = graph.require_node(trigger_node_id)?;
        if spec.kind != NodeKind::Trigger {
            return Err(StepError::InvalidArgument(format!(
                "node '{}' is not a trigger",
                trigger_node_id
            )));
        }

        let trigger = self
            .registry
            .trigger(&spec.reference)
            .ok_or_else(|| StepError::NotFound(format!("trigger '{}'", spec.reference)))?;

        let Some(payload) = trigger
            .accept(&spec.configuration, &event)
            .map_err(|e| e.for_node(&spec.id))?
        else {
            tracing::debug!(
                workflow_id = %workflow_id,
                node_id = %trigger_node_id,
                "Trigger declined event"
            );
            return Ok(None);
        };

        let root_event_id = Uuid::new_v4();
        tracing::debug!(
            workflow_id = %workflow_id,
            node_id = %trigger_node_id,
            root_event_id = %root_event_id,
            "Trigger accepted event"
        );

        let outputs = outputs_on(DEFAULT_CHANNEL, vec![payload]);
        let targets = self
            .emit(&graph, &spec.id, root_event_id, &outputs)
            .await?;
        self.run(Work::drains(workflow_id, targets)).await?;

        Ok(Some(root_event_id))
    }

    /// Buffer an item for a node and process that node's queue.
    pub async fn enqueue(&self, item: QueueItem) -> Result<()> {
        let graph = self.workflow(&item.workflow_id).await?;
        let spec = graph.require_node(&item.node_id)?;
        self.component_for(spec)?;

        self.store.enqueue(&item).await?;
        self.run(Work::drains(&item.workflow_id, vec![item.node_id.clone()]))
            .await
    }

    pub async fn execution(&self, execution_id: Uuid) -> Result<NodeExecution> {
        self.store
            .find_execution(execution_id)
            .await?
            .ok_or_else(|| StepError::NotFound(format!("execution {}", execution_id)))
    }

    /// Every execution of a node, in creation order.
    pub async fn executions(&self, workflow_id: &str, node_id: &str) -> Result<Vec<NodeExecution>> {
        self.store.executions(workflow_id, node_id).await
    }

    /// Invoke a user-accessible action on an open execution.
    ///
    /// Fails with `already finished` on finished executions. Any error leaves
    /// the execution unchanged.
    pub async fn invoke_action(
        &self,
        execution_id: Uuid,
        action: &str,
        parameters: serde_json::Value,
    ) -> Result<NodeExecution> {
        let committed = {
            let _guard = self.locks.execution(execution_id).await;
            let execution = self.execution(execution_id).await?;
            let node_id = execution.node_id.clone();

            if execution.is_finished() {
                return Err(StepError::AlreadyFinished.for_action(node_id, action));
            }

            let graph = self.workflow(&execution.workflow_id).await?;
            let spec = graph.require_node(&execution.node_id)?;
            let component = self.component_for(spec)?;

            let definition = component
                .action(action)
                .filter(|d| d.user_accessible)
                .ok_or_else(|| {
                    StepError::UnknownAction(action.to_string()).for_action(&node_id, action)
                })?;
            definition
                .validate_parameters(&parameters)
                .map_err(|e| e.for_action(&node_id, action))?;

            tracing::debug!(
                workflow_id = %execution.workflow_id,
                node_id = %node_id,
                execution_id = %execution_id,
                action = %action,
                "Invoking user action"
            );

            let call = ActionCall::new(action, parameters, ActionOrigin::User);
            let mut ctx = self.context(&graph, spec, execution, Vec::new(), self.clock.now());
            component
                .handle_action(&call, &mut ctx)
                .await
                .map_err(|e| e.for_action(&node_id, action))?;

            self.commit(ctx.into_effects(), false).await?
        };

        self.settle(&committed).await?;
        Ok(committed)
    }

    /// Fire scheduled calls due at `now`. Returns how many were fired.
    ///
    /// Calls are deleted after handling, whatever the outcome.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let calls = self
            .store
            .due_calls(now, self.config.timer_batch_size)
            .await?;
        let count = calls.len();

        for call in calls {
            if let Err(e) = self.fire(&call, now).await {
                tracing::error!(
                    execution_id = %call.execution_id,
                    action = %call.action,
                    error = %e,
                    "Failed to fire scheduled action"
                );
            }
            self.store.delete_call(call.id).await?;
        }

        Ok(count)
    }

    /// Re-run `execute` on an open execution, e.g. after a configuration change.
    ///
    /// Finished executions are returned unchanged.
    pub async fn reevaluate(&self, execution_id: Uuid) -> Result<NodeExecution> {
        let located = self.execution(execution_id).await?;
        if located.is_finished() {
            return Ok(located);
        }

        let committed = {
            // `execute` may consume queued items, so the node lock comes first.
            let _node = self
                .locks
                .node(&located.workflow_id, &located.node_id)
                .await;
            let _guard = self.locks.execution(execution_id).await;
            let execution = self.execution(execution_id).await?;
            if execution.is_finished() {
                return Ok(execution);
            }

            let graph = self.workflow(&execution.workflow_id).await?;
            let spec = graph.require_node(&execution.node_id)?;
            let component = self.component_for(spec)?;
            if component.fan_in().is_some() {
                return Err(StepError::InvalidArgument(format!(
                    "node '{}' runs once its inputs are collected",
                    spec.id
                )));
            }

            let queue = self
                .store
                .queue_items(&execution.workflow_id, &execution.node_id)
                .await?;
            let mut ctx = self.context(&graph, spec, execution, queue, self.clock.now());
            component
                .execute(&mut ctx)
                .await
                .map_err(|e| e.for_node(&spec.id))?;

            self.commit(ctx.into_effects(), false).await?
        };

        self.settle(&committed).await?;
        Ok(committed)
    }

    fn component_for(&self, spec: &NodeSpec) -> Result<Arc<dyn Component>> {
        if spec.kind != NodeKind::Component {
            return Err(StepError::InvalidArgument(format!(
                "node '{}' is not a component",
                spec.id
            )));
        }
        self.registry
            .component(&spec.reference)
            .ok_or_else(|| StepError::NotFound(format!("component '{}'", spec.reference)))
    }
}
