//! Built-in components.

mod approval;
mod branch;
mod group_by;
mod merge;
mod noop;
mod time_gate;
mod wait;

pub use approval::{Approval, ApprovalMetadata, ApprovalRecord};
pub use branch::{Filter, If};
pub use group_by::{field_set_hash, GroupBy, GroupByMetadata};
pub use merge::{Merge, TimeoutPolicy};
pub use noop::Noop;
pub use time_gate::{GateMode, TimeGate, TimeGateMetadata, TimeWindow};
pub use wait::{Wait, WaitMetadata};
