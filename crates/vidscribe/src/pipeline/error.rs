use thiserror::Error;

/// Failures that end a coordinator run. Stage failures never appear here;
/// they are contained per file and recorded in the job's error list.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("State store failed: {0}")]
    Store(#[from] crate::error::StoreError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid job '{job_id}': {reason}")]
    InvalidJob { job_id: String, reason: String },
}
