mod record;
mod state;

pub use record::NodeExecution;
pub use state::{outputs_on, ExecutionResult, ExecutionState, Outputs, DEFAULT_CHANNEL};
