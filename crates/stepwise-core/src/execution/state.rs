use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::StepError;

/// Name of the channel used when a component does not pick a branch.
pub const DEFAULT_CHANNEL: &str = "default";

/// Output channel name mapped to its ordered payloads.
pub type Outputs = BTreeMap<String, Vec<serde_json::Value>>;

/// Build outputs that emit `payloads` on a single channel.
pub fn outputs_on(channel: impl Into<String>, payloads: Vec<serde_json::Value>) -> Outputs {
    let mut outputs = Outputs::new();
    outputs.insert(channel.into(), payloads);
    outputs
}

/// Lifecycle state of a node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// Created, not yet parked or finished.
    Pending,
    /// Suspended on a timer, a queue subscription or an external action.
    Waiting,
    /// Terminal.
    Finished,
}

impl ExecutionState {
    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Finished => "finished",
        }
    }

    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl FromStr for ExecutionState {
    type Err = StepError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "waiting" => Ok(Self::Waiting),
            "finished" => Ok(Self::Finished),
            other => Err(StepError::InvalidState(format!(
                "unknown execution state '{}'",
                other
            ))),
        }
    }
}

/// Outcome of a finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ExecutionResult {
    Passed,
    Failed { reason: String, message: String },
}

impl ExecutionResult {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}
