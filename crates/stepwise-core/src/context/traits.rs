use std::time::Duration;

use crate::execution::Outputs;
use crate::metadata::{self, ComponentMetadata};
use crate::queue::QueueItem;
use crate::Result;

/// Access to the component-owned state of one execution.
pub trait MetadataContext {
    /// Raw metadata, if any was recorded.
    fn get_metadata(&self) -> Option<&serde_json::Value>;

    /// Replace the metadata.
    fn set_metadata(&mut self, value: serde_json::Value);

    /// Decode typed metadata, failing if it is absent or malformed.
    fn load<T: ComponentMetadata>(&self) -> Result<T> {
        metadata::decode(self.get_metadata())
    }

    /// Decode typed metadata if present.
    fn load_optional<T: ComponentMetadata>(&self) -> Result<Option<T>> {
        metadata::decode_optional(self.get_metadata())
    }

    /// Encode and store typed metadata.
    fn store<T: ComponentMetadata>(&mut self, value: &T) -> Result<()> {
        let raw = metadata::encode(value)?;
        self.set_metadata(raw);
        Ok(())
    }
}

/// Terminal and non-terminal transitions of one execution.
pub trait ExecutionStateContext {
    fn pass(&mut self, outputs: Outputs) -> Result<()>;
    fn fail(&mut self, reason: &str, message: &str) -> Result<()>;
    fn wait(&mut self) -> Result<()>;
    fn finish(&mut self, outputs: Outputs) -> Result<()>;
    fn is_finished(&self) -> bool;
}

/// Suspension primitives.
pub trait RequestContext {
    /// Re-invoke `action` on this execution after `delay`.
    fn schedule_action_call(
        &mut self,
        action: &str,
        parameters: serde_json::Value,
        delay: Duration,
    ) -> Result<()>;

    /// Invoke `action` whenever `event` arrives for this node.
    fn subscribe_to(&mut self, event: &str, action: &str) -> Result<()>;
}

/// Fan-in view of the node's queue and its upstream topology.
pub trait WorkflowContext {
    /// Next buffered item not yet visited during this invocation.
    fn dequeue(&mut self) -> Option<QueueItem>;

    /// Remove an item from the queue once this invocation commits.
    fn consume(&mut self, item: &QueueItem) -> Result<()>;

    /// Node that produced the triggering payload.
    fn source_node(&self) -> Option<&str>;

    /// Distinct upstream nodes feeding this node.
    fn previous_nodes(&self) -> &[String];
}
