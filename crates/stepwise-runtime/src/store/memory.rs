use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use stepwise_core::{
    NodeExecution, QueueItem, Result, ScheduledActionCall, StepError, Subscription,
};

use super::Store;

#[derive(Default)]
struct MemoryState {
    executions: Vec<NodeExecution>,
    queue: Vec<QueueItem>,
    calls: Vec<ScheduledActionCall>,
    subscriptions: Vec<Subscription>,
}

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    async fn insert_execution(&self, execution: &NodeExecution) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.executions.iter().any(|e| e.id == execution.id) {
            return Err(StepError::InvalidState(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        state.executions.push(execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &NodeExecution) -> Result<()> {
        let mut state = self.state.lock().await;
        let existing = state
            .executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or_else(|| StepError::NotFound(format!("execution {}", execution.id)))?;
        *existing = execution.clone();
        Ok(())
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<NodeExecution>> {
        let state = self.state.lock().await;
        Ok(state.executions.iter().find(|e| e.id == id).cloned())
    }

    async fn executions(&self, workflow_id: &str, node_id: &str) -> Result<Vec<NodeExecution>> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id && e.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        self.state.lock().await.queue.push(item.clone());
        Ok(())
    }

    async fn queue_items(&self, workflow_id: &str, node_id: &str) -> Result<Vec<QueueItem>> {
        let state = self.state.lock().await;
        Ok(state
            .queue
            .iter()
            .filter(|i| i.workflow_id == workflow_id && i.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn delete_queue_item(&self, id: Uuid) -> Result<()> {
        self.state.lock().await.queue.retain(|i| i.id != id);
        Ok(())
    }

    async fn schedule(&self, call: &ScheduledActionCall) -> Result<()> {
        self.state.lock().await.calls.push(call.clone());
        Ok(())
    }

    async fn due_calls(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledActionCall>> {
        let state = self.state.lock().await;
        let mut due: Vec<ScheduledActionCall> = state
            .calls
            .iter()
            .filter(|c| c.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|c| c.run_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn delete_call(&self, id: Uuid) -> Result<()> {
        self.state.lock().await.calls.retain(|c| c.id != id);
        Ok(())
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<()> {
        let mut state = self.state.lock().await;
        let duplicate = state.subscriptions.iter().any(|s| {
            s.execution_id == subscription.execution_id
                && s.event == subscription.event
                && s.action == subscription.action
        });
        if !duplicate {
            state.subscriptions.push(subscription.clone());
        }
        Ok(())
    }

    async fn subscriptions(
        &self,
        workflow_id: &str,
        node_id: &str,
        event: &str,
    ) -> Result<Vec<Subscription>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.workflow_id == workflow_id && s.node_id == node_id && s.event == event)
            .cloned()
            .collect())
    }

    async fn remove_subscriptions(&self, execution_id: Uuid) -> Result<()> {
        self.state
            .lock()
            .await
            .subscriptions
            .retain(|s| s.execution_id != execution_id);
        Ok(())
    }
}
