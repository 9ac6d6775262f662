use thiserror::Error;

/// Core error type for stepwise operations.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("already finished")]
    AlreadyFinished,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("node '{node_id}': {source}")]
    Node {
        node_id: String,
        #[source]
        source: Box<StepError>,
    },

    #[error("node '{node_id}', action '{action}': {source}")]
    Action {
        node_id: String,
        action: String,
        #[source]
        source: Box<StepError>,
    },
}

impl StepError {
    /// Attach the failing node to this error.
    pub fn for_node(self, node_id: impl Into<String>) -> Self {
        StepError::Node {
            node_id: node_id.into(),
            source: Box::new(self),
        }
    }

    /// Attach the failing node and action to this error.
    pub fn for_action(self, node_id: impl Into<String>, action: impl Into<String>) -> Self {
        StepError::Action {
            node_id: node_id.into(),
            action: action.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with node/action context stripped.
    pub fn root(&self) -> &StepError {
        match self {
            StepError::Node { source, .. } | StepError::Action { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the error means the execution was already finished.
    pub fn is_already_finished(&self) -> bool {
        matches!(self.root(), StepError::AlreadyFinished)
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        StepError::Serialization(e.to_string())
    }
}

/// Result type alias using StepError.
pub type Result<T> = std::result::Result<T, StepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wrapping_keeps_root() {
        let err = StepError::AlreadyFinished.for_action("approval-1", "approve");
        assert!(err.is_already_finished());
        assert_eq!(
            err.to_string(),
            "node 'approval-1', action 'approve': already finished"
        );
    }

    #[test]
    fn test_node_context_message() {
        let err = StepError::Expression("bad".into()).for_node("group");
        assert!(matches!(err.root(), StepError::Expression(_)));
        assert!(!err.is_already_finished());
    }
}
