//! Persistence for executions, queue items, timers and subscriptions.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use stepwise_core::{NodeExecution, QueueItem, Result, ScheduledActionCall, Subscription};

/// Storage backend used by the engine.
///
/// Listing operations return records in creation order.
pub trait Store: Send + Sync + 'static {
    fn insert_execution(
        &self,
        execution: &NodeExecution,
    ) -> impl Future<Output = Result<()>> + Send;

    fn update_execution(
        &self,
        execution: &NodeExecution,
    ) -> impl Future<Output = Result<()>> + Send;

    fn find_execution(&self, id: Uuid)
        -> impl Future<Output = Result<Option<NodeExecution>>> + Send;

    /// Every execution of a node, finished or not.
    fn executions(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> impl Future<Output = Result<Vec<NodeExecution>>> + Send;

    fn enqueue(&self, item: &QueueItem) -> impl Future<Output = Result<()>> + Send;

    /// Buffered items for a node in insertion order.
    fn queue_items(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> impl Future<Output = Result<Vec<QueueItem>>> + Send;

    fn delete_queue_item(&self, id: Uuid) -> impl Future<Output = Result<()>> + Send;

    fn schedule(&self, call: &ScheduledActionCall) -> impl Future<Output = Result<()>> + Send;

    /// Calls whose `run_at` is not after `now`, earliest first.
    fn due_calls(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScheduledActionCall>>> + Send;

    fn delete_call(&self, id: Uuid) -> impl Future<Output = Result<()>> + Send;

    /// Record a subscription. Duplicate `(execution, event, action)` is a no-op.
    fn subscribe(&self, subscription: &Subscription) -> impl Future<Output = Result<()>> + Send;

    fn subscriptions(
        &self,
        workflow_id: &str,
        node_id: &str,
        event: &str,
    ) -> impl Future<Output = Result<Vec<Subscription>>> + Send;

    fn remove_subscriptions(&self, execution_id: Uuid)
        -> impl Future<Output = Result<()>> + Send;
}
