//! Context builder for driving a component directly.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::execution::NodeExecution;
use crate::queue::QueueItem;

/// Shorthand for building an [`ExecutionContext`] in tests.
pub struct TestContext;

impl TestContext {
    pub fn builder(node_id: impl Into<String>) -> TestContextBuilder {
        TestContextBuilder::new(node_id)
    }
}

/// Builder for a test [`ExecutionContext`].
pub struct TestContextBuilder {
    workflow_id: String,
    node_id: String,
    root_event_id: Uuid,
    configuration: serde_json::Value,
    input: serde_json::Value,
    source_node_id: Option<String>,
    previous_nodes: Vec<String>,
    queue: Vec<QueueItem>,
    metadata: Option<serde_json::Value>,
    now: DateTime<Utc>,
}

impl TestContextBuilder {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            workflow_id: "test-workflow".to_string(),
            node_id: node_id.into(),
            root_event_id: Uuid::new_v4(),
            configuration: serde_json::json!({}),
            input: serde_json::Value::Null,
            source_node_id: None,
            previous_nodes: Vec::new(),
            queue: Vec::new(),
            metadata: None,
            now: Utc::now(),
        }
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    pub fn with_root_event(mut self, root_event_id: Uuid) -> Self {
        self.root_event_id = root_event_id;
        self
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = configuration;
        self
    }

    /// Set the triggering payload and the node that produced it.
    pub fn with_input(mut self, source_node_id: impl Into<String>, input: serde_json::Value) -> Self {
        self.source_node_id = Some(source_node_id.into());
        self.input = input;
        self
    }

    pub fn with_payload(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_previous_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.previous_nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Buffer a queue item for this node from `source_node_id`.
    pub fn with_queued(mut self, source_node_id: impl Into<String>, data: serde_json::Value) -> Self {
        let item = QueueItem::new(
            self.workflow_id.clone(),
            self.node_id.clone(),
            source_node_id,
            crate::execution::DEFAULT_CHANNEL,
            self.root_event_id,
            data,
        );
        self.queue.push(item);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn build(self) -> ExecutionContext {
        let mut execution = NodeExecution::new(self.workflow_id, self.node_id, self.root_event_id)
            .with_input(self.source_node_id, self.input);
        execution.metadata = self.metadata;

        ExecutionContext::new(execution, self.configuration)
            .with_previous_nodes(self.previous_nodes)
            .with_queue(self.queue)
            .with_now(self.now)
    }
}
