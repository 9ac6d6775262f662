use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{ExecutionResult, ExecutionState, Outputs};
use crate::{Result, StepError};

/// One attempt to run a node's logic for one triggering input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Execution ID.
    pub id: Uuid,
    /// Owning workflow.
    pub workflow_id: String,
    /// Owning node.
    pub node_id: String,
    /// Root event of the wave this execution belongs to.
    pub root_event_id: Uuid,
    /// Current lifecycle state.
    pub state: ExecutionState,
    /// Outcome, set once finished.
    pub result: Option<ExecutionResult>,
    /// Emitted payloads per channel, set once finished.
    pub outputs: Outputs,
    /// Component-owned state carried across suspensions.
    pub metadata: Option<serde_json::Value>,
    /// Triggering payload.
    pub input: serde_json::Value,
    /// Node that produced the triggering payload.
    pub source_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    /// Create a new pending execution.
    pub fn new(
        workflow_id: impl Into<String>,
        node_id: impl Into<String>,
        root_event_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            node_id: node_id.into(),
            root_event_id,
            state: ExecutionState::Pending,
            result: None,
            outputs: Outputs::new(),
            metadata: None,
            input: serde_json::Value::Null,
            source_node_id: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Set the triggering payload and its producer.
    pub fn with_input(mut self, source_node_id: Option<String>, input: serde_json::Value) -> Self {
        self.source_node_id = source_node_id;
        self.input = input;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn passed(&self) -> bool {
        matches!(self.result, Some(ExecutionResult::Passed))
    }

    pub fn failed(&self) -> bool {
        matches!(self.result, Some(ExecutionResult::Failed { .. }))
    }

    /// Terminal success.
    pub fn pass(&mut self, outputs: Outputs) -> Result<()> {
        self.complete(ExecutionResult::Passed, outputs)
    }

    /// Terminal success routed to exactly one branch.
    pub fn finish(&mut self, outputs: Outputs) -> Result<()> {
        self.ensure_open()?;
        if outputs.len() != 1 {
            return Err(StepError::InvalidArgument(format!(
                "finish expects exactly one branch, got {}",
                outputs.len()
            )));
        }
        self.complete(ExecutionResult::Passed, outputs)
    }

    /// Terminal failure.
    pub fn fail(&mut self, reason: impl Into<String>, message: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        if reason.is_empty() {
            return Err(StepError::InvalidArgument(
                "failure reason must not be empty".into(),
            ));
        }
        self.complete(
            ExecutionResult::Failed {
                reason,
                message: message.into(),
            },
            Outputs::new(),
        )
    }

    /// Park the execution without output.
    pub fn wait(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = ExecutionState::Waiting;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn complete(&mut self, result: ExecutionResult, outputs: Outputs) -> Result<()> {
        self.ensure_open()?;
        let now = Utc::now();
        self.state = ExecutionState::Finished;
        self.result = Some(result);
        self.outputs = outputs;
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_finished() {
            return Err(StepError::AlreadyFinished);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{outputs_on, DEFAULT_CHANNEL};

    fn execution() -> NodeExecution {
        NodeExecution::new("wf", "node", Uuid::new_v4())
    }

    #[test]
    fn test_execution_creation() {
        let exec = execution();
        assert_eq!(exec.state, ExecutionState::Pending);
        assert!(exec.result.is_none());
        assert!(!exec.is_finished());
    }

    #[test]
    fn test_pass_is_one_shot() {
        let mut exec = execution();
        exec.pass(outputs_on(DEFAULT_CHANNEL, vec![serde_json::json!(1)]))
            .unwrap();
        assert!(exec.passed());
        assert!(exec.finished_at.is_some());

        let err = exec.fail("late", "too late").unwrap_err();
        assert!(matches!(err, StepError::AlreadyFinished));
        assert!(exec.passed());
        assert!(matches!(exec.wait(), Err(StepError::AlreadyFinished)));
    }

    #[test]
    fn test_wait_then_fail() {
        let mut exec = execution();
        exec.wait().unwrap();
        assert_eq!(exec.state, ExecutionState::Waiting);
        exec.wait().unwrap();

        exec.fail("rejected", "no").unwrap();
        assert!(exec.failed());
        assert!(exec.outputs.is_empty());
    }

    #[test]
    fn test_finish_requires_single_branch() {
        let mut exec = execution();
        let mut outputs = outputs_on("true", vec![]);
        outputs.insert("false".into(), vec![]);
        assert!(matches!(
            exec.finish(outputs),
            Err(StepError::InvalidArgument(_))
        ));
        assert!(!exec.is_finished());

        exec.finish(outputs_on("true", vec![serde_json::json!({})]))
            .unwrap();
        assert!(exec.passed());
    }

    #[test]
    fn test_fail_requires_reason() {
        let mut exec = execution();
        assert!(exec.fail("", "message").is_err());
        assert!(!exec.is_finished());
    }
}
