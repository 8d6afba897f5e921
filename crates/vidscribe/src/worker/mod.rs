pub mod job;
pub mod pool;

pub use job::{Disposition, JobResult};
pub use pool::{WorkerPool, WorkerSettings};

// Re-export crossbeam_channel for use in main
pub use crossbeam_channel;
