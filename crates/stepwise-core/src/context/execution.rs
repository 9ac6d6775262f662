use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::traits::{ExecutionStateContext, MetadataContext, RequestContext, WorkflowContext};
use crate::execution::{NodeExecution, Outputs};
use crate::queue::QueueItem;
use crate::schedule::{ScheduledActionCall, Subscription};
use crate::{Result, StepError};

/// Context handed to a component for one `execute` or `handle_action` call.
///
/// Every effect is buffered. The engine commits the buffer only when the
/// component returns `Ok`, so a failing call leaves no partial state behind.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution: NodeExecution,
    configuration: serde_json::Value,
    previous_nodes: Vec<String>,
    queue: Vec<QueueItem>,
    cursor: usize,
    consumed: Vec<Uuid>,
    scheduled: Vec<ScheduledActionCall>,
    subscriptions: Vec<Subscription>,
    now: DateTime<Utc>,
}

/// Buffered effects of one component call.
#[derive(Debug, Clone)]
pub struct ContextEffects {
    pub execution: NodeExecution,
    pub scheduled: Vec<ScheduledActionCall>,
    pub subscriptions: Vec<Subscription>,
    pub consumed: Vec<Uuid>,
}

impl ExecutionContext {
    /// Create a context for an execution and its node configuration.
    pub fn new(execution: NodeExecution, configuration: serde_json::Value) -> Self {
        Self {
            execution,
            configuration,
            previous_nodes: Vec::new(),
            queue: Vec::new(),
            cursor: 0,
            consumed: Vec::new(),
            scheduled: Vec::new(),
            subscriptions: Vec::new(),
            now: Utc::now(),
        }
    }

    /// Set the upstream nodes of the executing node.
    pub fn with_previous_nodes(mut self, nodes: Vec<String>) -> Self {
        self.previous_nodes = nodes;
        self
    }

    /// Set the queue snapshot visible through `dequeue`.
    pub fn with_queue(mut self, items: Vec<QueueItem>) -> Self {
        self.queue = items;
        self.cursor = 0;
        self
    }

    /// Set the evaluation time.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn execution(&self) -> &NodeExecution {
        &self.execution
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution.id
    }

    pub fn node_id(&self) -> &str {
        &self.execution.node_id
    }

    /// Raw node configuration.
    pub fn configuration(&self) -> &serde_json::Value {
        &self.configuration
    }

    /// Decode the node configuration into a typed struct.
    pub fn config<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.configuration.clone()).map_err(|e| {
            StepError::Config(format!(
                "invalid configuration for node '{}': {}",
                self.execution.node_id, e
            ))
        })
    }

    /// Triggering payload.
    pub fn input(&self) -> &serde_json::Value {
        &self.execution.input
    }

    /// Replace the triggering payload (used by fan-in once inputs are aggregated).
    pub fn set_input(&mut self, input: serde_json::Value) {
        self.execution.input = input;
    }

    /// Evaluation time.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Calls scheduled so far.
    pub fn scheduled(&self) -> &[ScheduledActionCall] {
        &self.scheduled
    }

    /// Subscriptions registered so far.
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Items consumed so far.
    pub fn consumed(&self) -> &[Uuid] {
        &self.consumed
    }

    /// Consume the context, returning its buffered effects.
    pub fn into_effects(self) -> ContextEffects {
        ContextEffects {
            execution: self.execution,
            scheduled: self.scheduled,
            subscriptions: self.subscriptions,
            consumed: self.consumed,
        }
    }
}

impl MetadataContext for ExecutionContext {
    fn get_metadata(&self) -> Option<&serde_json::Value> {
        self.execution.metadata.as_ref()
    }

    fn set_metadata(&mut self, value: serde_json::Value) {
        self.execution.metadata = Some(value);
    }
}

impl ExecutionStateContext for ExecutionContext {
    fn pass(&mut self, outputs: Outputs) -> Result<()> {
        self.execution.pass(outputs)
    }

    fn fail(&mut self, reason: &str, message: &str) -> Result<()> {
        self.execution.fail(reason, message)
    }

    fn wait(&mut self) -> Result<()> {
        self.execution.wait()
    }

    fn finish(&mut self, outputs: Outputs) -> Result<()> {
        self.execution.finish(outputs)
    }

    fn is_finished(&self) -> bool {
        self.execution.is_finished()
    }
}

impl RequestContext for ExecutionContext {
    fn schedule_action_call(
        &mut self,
        action: &str,
        parameters: serde_json::Value,
        delay: Duration,
    ) -> Result<()> {
        if self.execution.is_finished() {
            return Err(StepError::AlreadyFinished);
        }

        let call =
            ScheduledActionCall::after(self.execution.id, action, parameters, self.now, delay)?;
        tracing::debug!(
            execution_id = %self.execution.id,
            action = %action,
            run_at = %call.run_at,
            "Scheduled action call"
        );
        self.scheduled.push(call);
        Ok(())
    }

    fn subscribe_to(&mut self, event: &str, action: &str) -> Result<()> {
        if self.execution.is_finished() {
            return Err(StepError::AlreadyFinished);
        }

        let already = self
            .subscriptions
            .iter()
            .any(|s| s.event == event && s.action == action);
        if !already {
            self.subscriptions.push(Subscription::new(
                self.execution.id,
                self.execution.workflow_id.clone(),
                self.execution.node_id.clone(),
                event,
                action,
            ));
        }
        Ok(())
    }
}

impl WorkflowContext for ExecutionContext {
    fn dequeue(&mut self) -> Option<QueueItem> {
        let item = self.queue.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    fn consume(&mut self, item: &QueueItem) -> Result<()> {
        if item.node_id != self.execution.node_id {
            return Err(StepError::InvalidArgument(format!(
                "queue item {} belongs to node '{}'",
                item.id, item.node_id
            )));
        }
        if !self.consumed.contains(&item.id) {
            self.consumed.push(item.id);
        }
        Ok(())
    }

    fn source_node(&self) -> Option<&str> {
        self.execution.source_node_id.as_deref()
    }

    fn previous_nodes(&self) -> &[String] {
        &self.previous_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{outputs_on, DEFAULT_CHANNEL};
    use crate::metadata::ComponentMetadata;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Marker {
        step: u32,
    }

    impl ComponentMetadata for Marker {
        const KIND: &'static str = "marker";
    }

    fn context() -> ExecutionContext {
        let execution = NodeExecution::new("wf", "node", Uuid::new_v4());
        ExecutionContext::new(execution, json!({}))
    }

    fn item(node: &str, source: &str) -> QueueItem {
        QueueItem::new("wf", node, source, "default", Uuid::new_v4(), json!({}))
    }

    #[test]
    fn test_typed_metadata_roundtrip() {
        let mut ctx = context();
        assert!(ctx.load_optional::<Marker>().unwrap().is_none());
        ctx.store(&Marker { step: 2 }).unwrap();
        assert_eq!(ctx.load::<Marker>().unwrap(), Marker { step: 2 });
    }

    #[test]
    fn test_dequeue_does_not_remove() {
        let first = item("node", "a");
        let second = item("node", "b");
        let mut ctx = context().with_queue(vec![first.clone(), second.clone()]);

        assert_eq!(ctx.dequeue().unwrap().id, first.id);
        assert_eq!(ctx.dequeue().unwrap().id, second.id);
        assert!(ctx.dequeue().is_none());
        assert!(ctx.consumed().is_empty());

        ctx.consume(&second).unwrap();
        ctx.consume(&second).unwrap();
        assert_eq!(ctx.consumed(), &[second.id]);
    }

    #[test]
    fn test_consume_rejects_foreign_items() {
        let mut ctx = context();
        assert!(ctx.consume(&item("other", "a")).is_err());
    }

    #[test]
    fn test_schedule_uses_context_time() {
        let now = Utc::now();
        let mut ctx = context().with_now(now);
        ctx.schedule_action_call("poll", json!({"n": 1}), Duration::from_secs(30))
            .unwrap();

        let call = &ctx.scheduled()[0];
        assert_eq!(call.action, "poll");
        assert_eq!(call.run_at, now + chrono::Duration::seconds(30));
    }

    #[test]
    fn test_finished_context_rejects_suspension() {
        let mut ctx = context();
        ctx.pass(outputs_on(DEFAULT_CHANNEL, vec![])).unwrap();
        assert!(matches!(
            ctx.schedule_action_call("poll", json!({}), Duration::from_secs(1)),
            Err(StepError::AlreadyFinished)
        ));
        assert!(matches!(
            ctx.subscribe_to("queue.item", "queueItem"),
            Err(StepError::AlreadyFinished)
        ));
    }

    #[test]
    fn test_duplicate_subscription_is_collapsed() {
        let mut ctx = context();
        ctx.subscribe_to("queue.item", "queueItem").unwrap();
        ctx.subscribe_to("queue.item", "queueItem").unwrap();
        assert_eq!(ctx.subscriptions().len(), 1);
    }
}
