//! Job state store: the externally visible progress record of each job.
//!
//! Records are kept as one string field per entry, keyed by job id, so that
//! pollers in other processes can read them without knowing the Rust types.
//! Typed conversion happens in [`crate::job::record`].

use std::collections::HashMap;

use crate::error::StoreError;
use crate::job::record::field;
use crate::job::{Job, JobProgressRecord, RecordUpdate};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

pub trait JobStateStore: Send + Sync {
    /// Writes the initial `queued` record, replacing anything stored under
    /// the same id.
    fn initialize(&self, job: &Job) -> Result<JobProgressRecord, StoreError>;

    /// Merges the provided fields into an existing record in one atomic
    /// write. Fails with [`StoreError::UnknownJob`] if there is no record.
    fn update(&self, job_id: &str, update: &RecordUpdate) -> Result<(), StoreError>;

    fn read(&self, job_id: &str) -> Result<Option<JobProgressRecord>, StoreError>;
}

/// Removes entries that would move the stored record backwards.
///
/// `done_files`, `result_index` and `errors` describe the same set of
/// finished files, so they are kept or dropped together, along with
/// `progress`: if any of them would shrink, the whole per-file payload is
/// stale. `progress` on its own is dropped only when it regresses.
pub(crate) fn drop_regressions(
    job_id: &str,
    current: &HashMap<String, String>,
    fields: Vec<(&'static str, String)>,
) -> Vec<(&'static str, String)> {
    let stale_payload = fields.iter().any(|(name, value)| {
        let (old, new) = match *name {
            field::DONE_FILES => (
                count(current.get(*name)) as usize,
                count(Some(value)) as usize,
            ),
            field::RESULT_INDEX | field::ERRORS => {
                (list_len(current.get(*name)), list_len(Some(value)))
            }
            _ => return false,
        };
        if new < old {
            log::warn!(
                "Ignoring stale {} for job {}: {} -> {}",
                name,
                job_id,
                old,
                new
            );
            return true;
        }
        false
    });

    fields
        .into_iter()
        .filter(|(name, value)| match *name {
            field::DONE_FILES | field::RESULT_INDEX | field::ERRORS => !stale_payload,
            field::PROGRESS => {
                if stale_payload {
                    return false;
                }
                let old = count(current.get(*name));
                let new = count(Some(value));
                if new < old {
                    log::warn!(
                        "Ignoring progress regression for job {}: {} -> {}",
                        job_id,
                        old,
                        new
                    );
                    return false;
                }
                true
            }
            _ => true,
        })
        .collect()
}

fn count(raw: Option<&String>) -> u32 {
    raw.and_then(|v| v.parse::<u32>().ok()).unwrap_or(0)
}

fn list_len(raw: Option<&String>) -> usize {
    raw.and_then(|v| serde_json::from_str::<Vec<serde_json::Value>>(v).ok())
        .map_or(0, |items| items.len())
}

/// Shared behaviour checks run against every store implementation.
#[cfg(test)]
pub(crate) mod contract {
    use std::path::PathBuf;

    use super::*;
    use crate::job::{JobParameters, JobStatus, ResultEntry};

    pub fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            input_files: vec![PathBuf::from("/up/a.mp4"), PathBuf::from("/up/b.mp4")],
            output_directory: PathBuf::from(format!("/out/{id}")),
            parameters: JobParameters::default(),
        }
    }

    pub fn initialize_then_read(store: &dyn JobStateStore) {
        let created = store.initialize(&job("j1")).unwrap();
        let read = store.read("j1").unwrap().unwrap();
        assert_eq!(read.status, JobStatus::Queued);
        assert_eq!(read.total_files, 2);
        assert_eq!(read.message, "Queued");
        assert_eq!(read.output_dir, PathBuf::from("/out/j1"));
        assert_eq!(read.created_at.timestamp(), created.created_at.timestamp());
    }

    pub fn read_missing_is_none(store: &dyn JobStateStore) {
        assert!(store.read("nope").unwrap().is_none());
    }

    pub fn update_merges_fields(store: &dyn JobStateStore) {
        store.initialize(&job("j1")).unwrap();
        store
            .update(
                "j1",
                &RecordUpdate::new()
                    .status(JobStatus::Running)
                    .progress(20)
                    .message("Extracted audio from a.mp4 (1/2)"),
            )
            .unwrap();

        let record = store.read("j1").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.progress, 20);
        assert_eq!(record.message, "Extracted audio from a.mp4 (1/2)");
        assert_eq!(record.total_files, 2);
        assert!(record.updated_at.is_some());
    }

    pub fn update_unknown_job_fails(store: &dyn JobStateStore) {
        let err = store
            .update("ghost", &RecordUpdate::new().progress(10))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownJob(id) if id == "ghost"));
    }

    pub fn regressions_are_ignored(store: &dyn JobStateStore) {
        store.initialize(&job("j1")).unwrap();
        store
            .update("j1", &RecordUpdate::new().progress(50).done_files(1))
            .unwrap();
        store
            .update(
                "j1",
                &RecordUpdate::new()
                    .progress(30)
                    .done_files(0)
                    .message("late write"),
            )
            .unwrap();

        let record = store.read("j1").unwrap().unwrap();
        assert_eq!(record.progress, 50);
        assert_eq!(record.done_files, 1);
        assert_eq!(record.message, "late write");
    }

    pub fn stale_file_payload_is_dropped_as_a_unit(store: &dyn JobStateStore) {
        let entry = |name: &str| ResultEntry {
            video: name.to_string(),
            docx_path: format!("/out/j1/{name}.docx"),
        };
        store.initialize(&job("j1")).unwrap();
        store
            .update(
                "j1",
                &RecordUpdate::new()
                    .progress(90)
                    .done_files(2)
                    .result_index(vec![entry("a.mp4"), entry("b.mp4")]),
            )
            .unwrap();
        // A redelivered run that has only reached the first file.
        store
            .update(
                "j1",
                &RecordUpdate::new()
                    .progress(45)
                    .done_files(1)
                    .result_index(vec![entry("a.mp4")])
                    .message("Rendered a.mp4 (1/2)"),
            )
            .unwrap();
        // Same count, shorter list.
        store
            .update(
                "j1",
                &RecordUpdate::new()
                    .progress(95)
                    .done_files(2)
                    .result_index(vec![entry("b.mp4")]),
            )
            .unwrap();

        let record = store.read("j1").unwrap().unwrap();
        assert_eq!(record.done_files, 2);
        assert_eq!(record.progress, 90);
        assert_eq!(record.result_index.len(), 2);
        assert_eq!(record.result_index.len() + record.errors.len(), 2);
        assert_eq!(record.message, "Rendered a.mp4 (1/2)");
    }

    pub fn initialize_replaces_previous_record(store: &dyn JobStateStore) {
        store.initialize(&job("j1")).unwrap();
        store
            .update(
                "j1",
                &RecordUpdate::new().progress(100).result_index(vec![ResultEntry {
                    video: "a.mp4".to_string(),
                    docx_path: "/out/j1/a.mp4.docx".to_string(),
                }]),
            )
            .unwrap();

        store.initialize(&job("j1")).unwrap();
        let record = store.read("j1").unwrap().unwrap();
        assert_eq!(record.progress, 0);
        assert!(record.result_index.is_empty());
        assert!(record.updated_at.is_none());
    }

    pub fn jobs_are_independent(store: &dyn JobStateStore) {
        store.initialize(&job("j1")).unwrap();
        store.initialize(&job("j2")).unwrap();
        store
            .update("j1", &RecordUpdate::new().progress(70))
            .unwrap();
        assert_eq!(store.read("j2").unwrap().unwrap().progress, 0);
    }
}
