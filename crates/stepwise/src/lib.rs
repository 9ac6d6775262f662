//! Stepwise - a workflow step execution engine
//!
//! Routes payloads through a graph of components, suspends executions that
//! wait on time, people or other branches, and resumes them through
//! scheduled action calls and queue subscriptions.

mod observability;
mod runtime;

#[doc(hidden)]
pub use stepwise_core;
#[doc(hidden)]
pub use stepwise_runtime;

pub use stepwise_core::{
    assert_err, assert_err_variant, assert_failed, assert_ok, assert_passed, assert_waiting,
};

pub use observability::init_tracing;
pub use runtime::prelude;
pub use runtime::{Stepwise, StepwiseBuilder};
