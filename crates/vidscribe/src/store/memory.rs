use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use super::{drop_regressions, JobStateStore};
use crate::error::StoreError;
use crate::job::record::field;
use crate::job::{Job, JobProgressRecord, RecordUpdate};

/// In-process [`JobStateStore`] with the same field-level semantics as the
/// SQLite store. Used by tests and single-process embedding.
#[derive(Default)]
pub struct MemoryStateStore {
    jobs: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStateStore for MemoryStateStore {
    fn initialize(&self, job: &Job) -> Result<JobProgressRecord, StoreError> {
        let record = JobProgressRecord::queued(job, Utc::now());
        let fields = record
            .to_fields()?
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        jobs.insert(job.id.clone(), fields);
        Ok(record)
    }

    fn update(&self, job_id: &str, update: &RecordUpdate) -> Result<(), StoreError> {
        let fields = update.to_fields()?;

        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        let current = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::UnknownJob(job_id.to_string()))?;

        let mut fields = drop_regressions(job_id, current, fields);
        fields.push((field::UPDATED_AT, Utc::now().to_rfc3339()));
        for (name, value) in fields {
            current.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn read(&self, job_id: &str) -> Result<Option<JobProgressRecord>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        match jobs.get(job_id) {
            Some(fields) => Ok(Some(JobProgressRecord::from_fields(job_id, fields)?)),
            None => Ok(None),
        }
    }
}
