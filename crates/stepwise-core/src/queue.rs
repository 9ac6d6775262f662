use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event name delivered to executions subscribed to their node's queue.
pub const QUEUE_ITEM_EVENT: &str = "queue.item";

/// One upstream event waiting to be consumed by a downstream node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Item ID.
    pub id: Uuid,
    pub workflow_id: String,
    /// Consuming node.
    pub node_id: String,
    /// Producing node.
    pub source_node_id: String,
    /// Output channel the producer emitted on.
    pub channel: String,
    /// Root event of the wave that produced the item.
    pub root_event_id: Uuid,
    /// Payload.
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a new queue item.
    pub fn new(
        workflow_id: impl Into<String>,
        node_id: impl Into<String>,
        source_node_id: impl Into<String>,
        channel: impl Into<String>,
        root_event_id: Uuid,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            node_id: node_id.into(),
            source_node_id: source_node_id.into(),
            channel: channel.into(),
            root_event_id,
            data,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_item_creation() {
        let root = Uuid::new_v4();
        let item = QueueItem::new(
            "wf",
            "merge",
            "build",
            "default",
            root,
            serde_json::json!({"ok": true}),
        );
        assert_eq!(item.node_id, "merge");
        assert_eq!(item.source_node_id, "build");
        assert_eq!(item.root_event_id, root);
    }
}
