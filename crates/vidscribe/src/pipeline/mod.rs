pub mod annotate;
pub mod coordinator;
pub mod error;
pub mod progress;

pub use coordinator::{Coordinator, CoordinatorSettings, RunSummary};
pub use error::CoordinatorError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
