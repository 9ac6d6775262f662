mod execution;
mod traits;

pub use execution::{ContextEffects, ExecutionContext};
pub use traits::{ExecutionStateContext, MetadataContext, RequestContext, WorkflowContext};
