use crate::pipeline::RunSummary;
use crate::queue::Delivery;

/// What the worker did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The coordinator ran to completion and the item was acked.
    Completed,
    /// The record was already terminal; the item was acked untouched.
    AlreadyFinished,
    /// The delivery exceeded the attempt limit; the job was marked failed.
    DeadLettered,
    /// Shutdown interrupted the run; the item went back to the queue.
    Released,
    /// The run failed and the job was marked failed.
    Failed,
    /// The run failed and the failure could not be recorded; the item stays
    /// leased and will be redelivered when the lease expires.
    Retry,
}

impl Disposition {
    /// Whether the queue item was removed.
    pub fn is_acked(&self) -> bool {
        matches!(
            self,
            Disposition::Completed
                | Disposition::AlreadyFinished
                | Disposition::DeadLettered
                | Disposition::Failed
        )
    }
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub attempts: u32,
    pub disposition: Disposition,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

impl JobResult {
    pub fn finished(delivery: &Delivery, summary: RunSummary) -> Self {
        let disposition = if summary.already_finished {
            Disposition::AlreadyFinished
        } else {
            Disposition::Completed
        };
        Self {
            job_id: delivery.item.job_id.clone(),
            attempts: delivery.attempts,
            disposition,
            summary: Some(summary),
            error: None,
        }
    }

    pub fn failure(delivery: &Delivery, disposition: Disposition, error: String) -> Self {
        Self {
            job_id: delivery.item.job_id.clone(),
            attempts: delivery.attempts,
            disposition,
            summary: None,
            error: Some(error),
        }
    }
}
