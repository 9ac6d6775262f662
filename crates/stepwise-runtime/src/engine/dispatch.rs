use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use stepwise_core::fan_in::FanInPolicy;
use stepwise_core::{
    ActionCall, ActionOrigin, Component, ContextEffects, ExecutionContext, ExecutionStateContext,
    FanInState, MetadataContext, NodeExecution, Outputs, QueueItem, Result, ScheduledActionCall,
    StepError, Subscription, WorkflowContext, QUEUE_ITEM_EVENT,
};

use super::Engine;
use crate::graph::{NodeSpec, WorkflowGraph};
use crate::store::Store;

/// A unit of routing work.
#[derive(Debug)]
pub(super) enum Work {
    /// Send a finished execution's outputs downstream.
    Route(NodeExecution),
    /// Process the queue of one node.
    Drain { workflow_id: String, node_id: String },
}

impl Work {
    pub(super) fn drains(workflow_id: &str, node_ids: Vec<String>) -> Vec<Work> {
        node_ids
            .into_iter()
            .map(|node_id| Work::Drain {
                workflow_id: workflow_id.to_string(),
                node_id,
            })
            .collect()
    }

    fn is_drain_of(&self, workflow: &str, node: &str) -> bool {
        matches!(self, Work::Drain { workflow_id, node_id } if workflow_id == workflow && node_id == node)
    }
}

impl<S: Store> Engine<S> {
    /// Run routing work to completion, breadth first.
    pub(super) async fn run(&self, work: Vec<Work>) -> Result<()> {
        let mut pending: VecDeque<Work> = work.into();

        while let Some(next) = pending.pop_front() {
            match next {
                Work::Route(execution) => {
                    if !execution.passed() {
                        continue;
                    }
                    let graph = self.workflow(&execution.workflow_id).await?;
                    let targets = self
                        .emit(
                            &graph,
                            &execution.node_id,
                            execution.root_event_id,
                            &execution.outputs,
                        )
                        .await?;
                    for target in targets {
                        if !pending
                            .iter()
                            .any(|w| w.is_drain_of(&execution.workflow_id, &target))
                        {
                            pending.push_back(Work::Drain {
                                workflow_id: execution.workflow_id.clone(),
                                node_id: target,
                            });
                        }
                    }
                }
                Work::Drain {
                    workflow_id,
                    node_id,
                } => {
                    let finished = self.process_queue(&workflow_id, &node_id).await?;
                    pending.extend(finished.into_iter().map(Work::Route));
                }
            }
        }

        Ok(())
    }

    /// Route a finished execution downstream and release its lock entry.
    pub(super) async fn settle(&self, execution: &NodeExecution) -> Result<()> {
        if !execution.is_finished() {
            return Ok(());
        }
        self.locks.forget_execution(execution.id).await;
        self.run(vec![Work::Route(execution.clone())]).await
    }

    /// Enqueue each payload along the matching edges. Returns the target nodes.
    pub(super) async fn emit(
        &self,
        graph: &WorkflowGraph,
        source_node_id: &str,
        root_event_id: Uuid,
        outputs: &Outputs,
    ) -> Result<Vec<String>> {
        let mut targets: Vec<String> = Vec::new();

        for (channel, payloads) in outputs {
            for edge in graph.outgoing(source_node_id, channel) {
                for payload in payloads {
                    let item = QueueItem::new(
                        graph.id.clone(),
                        edge.target_id.clone(),
                        source_node_id,
                        channel.clone(),
                        root_event_id,
                        payload.clone(),
                    );
                    self.store.enqueue(&item).await?;
                }
                if !targets.contains(&edge.target_id) {
                    targets.push(edge.target_id.clone());
                }
            }
        }

        Ok(targets)
    }

    /// Process every buffered item of a node. Returns executions that finished.
    async fn process_queue(&self, workflow_id: &str, node_id: &str) -> Result<Vec<NodeExecution>> {
        let graph = self.workflow(workflow_id).await?;
        let spec = graph.require_node(node_id)?;
        let component = self.component_for(spec)?;

        let _guard = self.locks.node(workflow_id, node_id).await;

        let mut attempted: HashSet<Uuid> = HashSet::new();
        let mut finished = Vec::new();

        loop {
            let queue = self.store.queue_items(workflow_id, node_id).await?;
            let Some(item) = queue.into_iter().find(|i| !attempted.contains(&i.id)) else {
                break;
            };
            attempted.insert(item.id);

            let done = match component.fan_in() {
                Some(policy) => {
                    self.collect(&graph, spec, component.as_ref(), policy, &item)
                        .await?
                }
                None => self.offer(&graph, spec, component.as_ref(), &item).await?,
            };

            if let Some(execution) = done {
                self.locks.forget_execution(execution.id).await;
                finished.push(execution);
            }
        }

        Ok(finished)
    }

    /// Hand an item to waiting subscribers, or start a new execution with it.
    async fn offer(
        &self,
        graph: &WorkflowGraph,
        spec: &NodeSpec,
        component: &dyn Component,
        item: &QueueItem,
    ) -> Result<Option<NodeExecution>> {
        let subscriptions = self
            .store
            .subscriptions(&graph.id, &spec.id, QUEUE_ITEM_EVENT)
            .await?;

        for subscription in subscriptions {
            if let Some(execution) = self
                .deliver(graph, spec, component, &subscription, item)
                .await?
            {
                return Ok(execution.is_finished().then_some(execution));
            }
        }

        self.start(graph, spec, component, item).await
    }

    /// Deliver an item to one subscriber. Returns the execution if it consumed the item.
    async fn deliver(
        &self,
        graph: &WorkflowGraph,
        spec: &NodeSpec,
        component: &dyn Component,
        subscription: &Subscription,
        item: &QueueItem,
    ) -> Result<Option<NodeExecution>> {
        let _guard = self.locks.execution(subscription.execution_id).await;

        let execution = match self.store.find_execution(subscription.execution_id).await? {
            Some(execution) if !execution.is_finished() => execution,
            _ => {
                self.store
                    .remove_subscriptions(subscription.execution_id)
                    .await?;
                return Ok(None);
            }
        };

        tracing::debug!(
            workflow_id = %graph.id,
            node_id = %spec.id,
            execution_id = %execution.id,
            action = %subscription.action,
            "Delivering queue item to subscriber"
        );

        let call = ActionCall::new(
            subscription.action.clone(),
            serde_json::json!({ "queueItemId": item.id }),
            ActionOrigin::Subscription,
        );
        let mut ctx = self.context(graph, spec, execution.clone(), vec![item.clone()], self.clock.now());

        match component.handle_action(&call, &mut ctx).await {
            Ok(()) => {
                let consumed = ctx.consumed().contains(&item.id);
                let committed = self.commit(ctx.into_effects(), false).await?;
                Ok(consumed.then_some(committed))
            }
            Err(e) => {
                self.fail_execution(execution, false, &e.for_action(&spec.id, &subscription.action))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Start a new execution triggered by `item`.
    async fn start(
        &self,
        graph: &WorkflowGraph,
        spec: &NodeSpec,
        component: &dyn Component,
        item: &QueueItem,
    ) -> Result<Option<NodeExecution>> {
        self.store.delete_queue_item(item.id).await?;

        let execution = NodeExecution::new(graph.id.clone(), spec.id.clone(), item.root_event_id)
            .with_input(Some(item.source_node_id.clone()), item.data.clone());
        let _guard = self.locks.execution(execution.id).await;

        tracing::debug!(
            workflow_id = %graph.id,
            node_id = %spec.id,
            execution_id = %execution.id,
            root_event_id = %item.root_event_id,
            "Starting execution"
        );

        let queue = self.store.queue_items(&graph.id, &spec.id).await?;
        let mut ctx = self.context(graph, spec, execution.clone(), queue, self.clock.now());

        match component.execute(&mut ctx).await {
            Ok(()) => {
                let committed = self.commit(ctx.into_effects(), true).await?;
                Ok(committed.is_finished().then_some(committed))
            }
            Err(e) => {
                self.fail_execution(execution, true, &e.for_node(&spec.id))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Feed an item into the collecting execution of its root event.
    async fn collect(
        &self,
        graph: &WorkflowGraph,
        spec: &NodeSpec,
        component: &dyn Component,
        policy: &dyn FanInPolicy,
        item: &QueueItem,
    ) -> Result<Option<NodeExecution>> {
        let existing = self
            .store
            .executions(&graph.id, &spec.id)
            .await?
            .into_iter()
            .find(|e| e.root_event_id == item.root_event_id);

        let (execution, is_new) = match existing {
            Some(execution) => (execution, false),
            None => (
                NodeExecution::new(graph.id.clone(), spec.id.clone(), item.root_event_id),
                true,
            ),
        };

        let _guard = self.locks.execution(execution.id).await;
        let execution = if is_new {
            execution
        } else {
            self.execution(execution.id).await?
        };

        if execution.is_finished() {
            tracing::debug!(
                node_id = %spec.id,
                execution_id = %execution.id,
                source_node_id = %item.source_node_id,
                "Dropping input for finished fan-in"
            );
            self.store.delete_queue_item(item.id).await?;
            return Ok(None);
        }

        let mut ctx = self.context(graph, spec, execution.clone(), Vec::new(), self.clock.now());

        match observe(graph, component, policy, item, &mut ctx, is_new).await {
            Ok(()) => {
                let committed = self.commit(ctx.into_effects(), is_new).await?;
                Ok(committed.is_finished().then_some(committed))
            }
            Err(e) => {
                self.store.delete_queue_item(item.id).await?;
                self.fail_execution(execution, is_new, &e.for_node(&spec.id))
                    .await?;
                Ok(None)
            }
        }
    }

    pub(super) fn context(
        &self,
        graph: &WorkflowGraph,
        spec: &NodeSpec,
        execution: NodeExecution,
        queue: Vec<QueueItem>,
        now: DateTime<Utc>,
    ) -> ExecutionContext {
        ExecutionContext::new(execution, spec.configuration.clone())
            .with_previous_nodes(graph.previous_nodes(&spec.id))
            .with_queue(queue)
            .with_now(now)
    }

    /// Persist the buffered effects of a successful component call.
    pub(super) async fn commit(&self, effects: ContextEffects, is_new: bool) -> Result<NodeExecution> {
        let ContextEffects {
            execution,
            scheduled,
            subscriptions,
            consumed,
        } = effects;

        if is_new {
            self.store.insert_execution(&execution).await?;
        } else {
            self.store.update_execution(&execution).await?;
        }

        for call in &scheduled {
            self.store.schedule(call).await?;
        }

        if execution.is_finished() {
            self.store.remove_subscriptions(execution.id).await?;
        } else {
            for subscription in &subscriptions {
                self.store.subscribe(subscription).await?;
            }
        }

        for id in consumed {
            self.store.delete_queue_item(id).await?;
        }

        if execution.is_finished() {
            tracing::info!(
                workflow_id = %execution.workflow_id,
                node_id = %execution.node_id,
                execution_id = %execution.id,
                root_event_id = %execution.root_event_id,
                passed = execution.passed(),
                "Execution finished"
            );
        }

        Ok(execution)
    }

    /// Record a fatal component error as a failure of the execution.
    pub(super) async fn fail_execution(
        &self,
        mut execution: NodeExecution,
        is_new: bool,
        error: &StepError,
    ) -> Result<NodeExecution> {
        tracing::error!(
            workflow_id = %execution.workflow_id,
            node_id = %execution.node_id,
            execution_id = %execution.id,
            error = %error,
            "Component error"
        );

        if execution.is_finished() {
            return Ok(execution);
        }

        execution.fail("error", error.to_string())?;
        if is_new {
            self.store.insert_execution(&execution).await?;
        } else {
            self.store.update_execution(&execution).await?;
        }
        self.store.remove_subscriptions(execution.id).await?;

        Ok(execution)
    }

    /// Replay one scheduled call.
    pub(super) async fn fire(&self, call: &ScheduledActionCall, now: DateTime<Utc>) -> Result<()> {
        let committed = {
            let _guard = self.locks.execution(call.execution_id).await;

            let Some(execution) = self.store.find_execution(call.execution_id).await? else {
                tracing::warn!(
                    execution_id = %call.execution_id,
                    action = %call.action,
                    "Scheduled action for missing execution"
                );
                return Ok(());
            };

            let graph = self.workflow(&execution.workflow_id).await?;
            let spec = graph.require_node(&execution.node_id)?;
            let component = self.component_for(spec)?;
            let was_finished = execution.is_finished();

            tracing::debug!(
                workflow_id = %execution.workflow_id,
                node_id = %execution.node_id,
                execution_id = %execution.id,
                action = %call.action,
                "Firing scheduled action"
            );

            let action = ActionCall::new(call.action.clone(), call.parameters.clone(), ActionOrigin::Timer);
            let mut ctx = self.context(&graph, spec, execution.clone(), Vec::new(), now);
            let result = component.handle_action(&action, &mut ctx).await;

            if was_finished {
                if let Err(e) = result {
                    tracing::warn!(
                        execution_id = %execution.id,
                        action = %call.action,
                        error = %e,
                        "Scheduled action on finished execution returned an error"
                    );
                }
                return Ok(());
            }

            match result {
                Ok(()) => self.commit(ctx.into_effects(), false).await?,
                Err(e) => {
                    self.fail_execution(execution, false, &e.for_action(&spec.id, &call.action))
                        .await?
                }
            }
        };

        self.settle(&committed).await
    }
}

/// Record one input on a collecting execution and run the node once ready.
async fn observe(
    graph: &WorkflowGraph,
    component: &dyn Component,
    policy: &dyn FanInPolicy,
    item: &QueueItem,
    ctx: &mut ExecutionContext,
    is_new: bool,
) -> Result<()> {
    let mut state = if is_new {
        let expected = policy.expected(&graph.incoming_edges(&item.node_id));
        policy.begin(ctx)?;
        FanInState::new(item.root_event_id.to_string(), expected)
    } else {
        ctx.load::<FanInState>()?
    };

    let (key, value) = policy.observe(&item.source_node_id, &item.channel, &item.data);
    if !state.record(key.clone(), value) {
        tracing::debug!(
            node_id = %item.node_id,
            key = %key,
            "Ignoring repeated fan-in input"
        );
    }
    ctx.store(&state)?;
    ctx.consume(item)?;

    policy.on_observe(item, ctx)?;
    if ctx.is_finished() {
        return Ok(());
    }

    if policy.ready(&state.expected, &state.observed) {
        ctx.set_input(policy.aggregate(&state.expected, &state.observed));
        component.execute(ctx).await
    } else {
        ctx.wait()
    }
}
