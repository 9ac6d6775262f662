pub mod clock;
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod expression;
pub mod fan_in;
pub mod metadata;
pub mod queue;
pub mod schedule;
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use component::{ActionCall, ActionDefinition, ActionOrigin, Component, ParameterDef, Trigger};
pub use config::StepwiseConfig;
pub use context::{
    ContextEffects, ExecutionContext, ExecutionStateContext, MetadataContext, RequestContext,
    WorkflowContext,
};
pub use error::{Result, StepError};
pub use execution::{
    outputs_on, ExecutionResult, ExecutionState, NodeExecution, Outputs, DEFAULT_CHANNEL,
};
pub use expression::ExpressionEngine;
pub use fan_in::{FanInPolicy, FanInState, IncomingEdge};
pub use metadata::ComponentMetadata;
pub use queue::{QueueItem, QUEUE_ITEM_EVENT};
pub use schedule::{ScheduledActionCall, Subscription};
