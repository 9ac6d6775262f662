use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StepError};

/// A durable timer that re-invokes a named action on one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledActionCall {
    pub id: Uuid,
    /// Execution the call is bound to.
    pub execution_id: Uuid,
    /// Action to invoke.
    pub action: String,
    /// Opaque action parameters.
    pub parameters: serde_json::Value,
    /// Earliest time the call may fire.
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledActionCall {
    /// Create a call firing `delay` after `now`.
    pub fn after(
        execution_id: Uuid,
        action: impl Into<String>,
        parameters: serde_json::Value,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Result<Self> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| StepError::InvalidArgument(format!("invalid delay: {}", e)))?;

        Ok(Self {
            id: Uuid::new_v4(),
            execution_id,
            action: action.into(),
            parameters,
            run_at: now + delay,
            created_at: now,
        })
    }

    /// Check if the call may fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }
}

/// An execution waiting for a named event on its node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub node_id: String,
    /// Event to wait for.
    pub event: String,
    /// Action invoked when the event arrives.
    pub action: String,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        node_id: impl Into<String>,
        event: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            workflow_id: workflow_id.into(),
            node_id: node_id.into(),
            event: event.into(),
            action: action.into(),
            created_at: Utc::now(),
        }
    }
}
