mod timer;

pub use timer::{TimerWorker, TimerWorkerConfig};
