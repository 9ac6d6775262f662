//! Testing utilities for components and engines.
//!
//! - assertion macros for results and execution outcomes
//! - [`ManualClock`] for deterministic time-based components
//! - [`TestContext`] for driving a component without an engine
//!
//! # Example
//!
//! ```ignore
//! let mut ctx = TestContext::builder("approval-1")
//!     .with_configuration(json!({"count": 2}))
//!     .build();
//!
//! component.execute(&mut ctx).await?;
//! assert_waiting!(ctx);
//! ```

pub mod assertions;
mod clock;
mod context;

pub use clock::ManualClock;
pub use context::{TestContext, TestContextBuilder};
