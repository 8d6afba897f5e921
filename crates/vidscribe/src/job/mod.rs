pub mod model;
pub mod record;

pub use model::{video_name, Job, JobParameters, WorkItem, DEFAULT_JOB_TIMEOUT};
pub use record::{
    Completion, FileError, JobProgressRecord, JobStatus, RecordUpdate, ResultEntry,
};
