pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod queue;
pub mod sanitize;
pub mod service;
pub mod stages;
pub mod store;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, Config};
pub use error::{
    ConfigError, LookupError, QueueError, Result, StageError, StoreError, SubmitError,
    VidscribeError,
};
pub use job::{Job, JobProgressRecord, JobStatus, WorkItem};
pub use pipeline::{Coordinator, CoordinatorSettings, RunSummary};
pub use queue::{SqliteWorkQueue, WorkQueue};
pub use service::{JobService, SubmitRequest};
pub use stages::StageSet;
pub use store::{JobStateStore, SqliteStateStore};
pub use worker::{WorkerPool, WorkerSettings};
