//! Broadcasting of live job progress events.

pub mod job_progress;

pub use job_progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
