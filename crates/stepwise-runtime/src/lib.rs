pub mod components;
pub mod engine;
pub mod graph;
pub mod registry;
pub mod store;
pub mod triggers;
pub mod worker;

pub use engine::Engine;
pub use graph::{Edge, NodeKind, NodeSpec, WorkflowGraph};
pub use registry::Registry;
pub use store::{MemoryStore, PgStore, Store};
pub use worker::{TimerWorker, TimerWorkerConfig};
