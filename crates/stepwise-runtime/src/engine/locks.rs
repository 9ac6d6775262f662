use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Async mutexes keyed by execution or node.
///
/// Node locks are always taken before execution locks, never the other way.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn execution(&self, id: Uuid) -> OwnedMutexGuard<()> {
        self.lock(format!("execution:{}", id)).await
    }

    pub async fn node(&self, workflow_id: &str, node_id: &str) -> OwnedMutexGuard<()> {
        self.lock(format!("node:{}:{}", workflow_id, node_id)).await
    }

    /// Drop the lock entry of a finished execution.
    pub async fn forget_execution(&self, id: Uuid) {
        let key = format!("execution:{}", id);
        let mut locks = self.locks.lock().await;
        // Only when nobody else holds or waits on it.
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
    }

    async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
