//! Producer-side entry points: submitting jobs, polling their records and
//! resolving finished documents.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::config::Config;
use crate::error::{LookupError, SubmitError};
use crate::job::{Job, JobParameters, JobProgressRecord, JobStatus, RecordUpdate};
use crate::queue::WorkQueue;
use crate::sanitize::redact_path;
use crate::store::JobStateStore;

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub input_files: Vec<PathBuf>,
    /// Seconds between sampled frames. Signed so that bad client input
    /// reaches validation instead of failing to parse.
    pub frame_interval: i64,
    /// Defaults to `<output_root>/<job_id>`.
    pub output_directory: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl SubmitRequest {
    pub fn new(input_files: Vec<PathBuf>, frame_interval: i64) -> Self {
        Self {
            input_files,
            frame_interval,
            output_directory: None,
            timeout: None,
        }
    }
}

pub struct JobService {
    store: Arc<dyn JobStateStore>,
    queue: Arc<dyn WorkQueue>,
    output_root: PathBuf,
    default_timeout: Duration,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStateStore>,
        queue: Arc<dyn WorkQueue>,
        output_root: impl Into<PathBuf>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            output_root: output_root.into(),
            default_timeout,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn JobStateStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self::new(
            store,
            queue,
            &config.output_root,
            config.queue.default_timeout(),
        )
    }

    /// Validates the request, writes the `queued` record and enqueues the
    /// work item. The record exists before the item can be dequeued.
    pub fn submit(&self, request: SubmitRequest) -> Result<JobProgressRecord, SubmitError> {
        validate_inputs(&request.input_files)?;
        let frame_interval = u32::try_from(request.frame_interval)
            .ok()
            .filter(|n| *n > 0)
            .ok_or(SubmitError::InvalidFrameInterval(request.frame_interval))?;

        let id = Job::generate_id();
        let output_directory = request
            .output_directory
            .unwrap_or_else(|| self.output_root.join(&id));
        std::fs::create_dir_all(&output_directory).map_err(|e| SubmitError::CreateOutputDir {
            path: output_directory.clone(),
            source: e,
        })?;

        let job = Job {
            id,
            input_files: request.input_files,
            output_directory,
            parameters: JobParameters {
                frame_interval,
                timeout: request.timeout.unwrap_or(self.default_timeout),
            },
        };

        let record = self.store.initialize(&job)?;

        if let Err(e) = self.queue.enqueue(&job.to_work_item()) {
            error!("Failed to enqueue job {}: {}", job.id, e);
            let update = RecordUpdate::new()
                .status(JobStatus::Failed)
                .progress(100)
                .message(format!("Could not enqueue job: {}", e));
            if let Err(store_err) = self.store.update(&job.id, &update) {
                error!("Failed to mark job {} as failed: {}", job.id, store_err);
            }
            return Err(e.into());
        }

        info!(
            "Submitted job {} with {} file(s) to {}",
            job.id,
            job.total_files(),
            redact_path(&job.output_directory)
        );
        Ok(record)
    }

    pub fn read_status(&self, job_id: &str) -> Result<JobProgressRecord, LookupError> {
        self.store
            .read(job_id)?
            .ok_or_else(|| LookupError::JobNotFound(job_id.to_string()))
    }

    /// Path of the document at `index` in the job's result index.
    pub fn resolve_artifact(&self, job_id: &str, index: usize) -> Result<PathBuf, LookupError> {
        let record = self.read_status(job_id)?;
        let entry = record
            .result_index
            .get(index)
            .ok_or(LookupError::IndexOutOfRange {
                index,
                len: record.result_index.len(),
            })?;

        let path = PathBuf::from(&entry.docx_path);
        if !path.is_file() {
            return Err(LookupError::ArtifactMissing(path));
        }
        Ok(path)
    }
}

fn validate_inputs(files: &[PathBuf]) -> Result<(), SubmitError> {
    if files.is_empty() {
        return Err(SubmitError::NoInputFiles);
    }
    for path in files {
        check_readable(path)?;
    }
    Ok(())
}

fn check_readable(path: &Path) -> Result<(), SubmitError> {
    let file = File::open(path).map_err(|e| SubmitError::UnreadableInput {
        path: path.to_path_buf(),
        source: e,
    })?;
    let metadata = file.metadata().map_err(|e| SubmitError::UnreadableInput {
        path: path.to_path_buf(),
        source: e,
    })?;
    if !metadata.is_file() {
        return Err(SubmitError::NotAFile(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::job::ResultEntry;
    use crate::queue::{Delivery, MemoryWorkQueue};
    use crate::store::MemoryStateStore;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<MemoryStateStore>,
        queue: Arc<MemoryWorkQueue>,
        service: JobService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStateStore::new());
        let queue = Arc::new(MemoryWorkQueue::new());
        let service = JobService::new(
            store.clone(),
            queue.clone(),
            dir.path().join("out"),
            Duration::from_secs(120),
        );
        Fixture {
            dir,
            store,
            queue,
            service,
        }
    }

    fn video(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[test]
    fn test_submit_initializes_record_then_enqueues() {
        let f = fixture();
        let input = video(f.dir.path(), "a.mp4");

        let record = f
            .service
            .submit(SubmitRequest::new(vec![input.clone()], 3))
            .unwrap();

        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.total_files, 1);
        assert_eq!(record.output_dir, f.dir.path().join("out").join(&record.job_id));
        assert!(record.output_dir.is_dir());
        assert_eq!(f.store.len(), 1);

        let delivery = f.queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(delivery.item.job_id, record.job_id);
        assert_eq!(delivery.item.frame_interval, 3);
        assert_eq!(delivery.item.timeout, Duration::from_secs(120));
        assert_eq!(delivery.item.video_paths, vec![input.to_string_lossy().to_string()]);
    }

    #[test]
    fn test_submit_honours_explicit_output_and_timeout() {
        let f = fixture();
        let input = video(f.dir.path(), "a.mp4");
        let mut request = SubmitRequest::new(vec![input], 1);
        request.output_directory = Some(f.dir.path().join("custom"));
        request.timeout = Some(Duration::from_secs(5));

        let record = f.service.submit(request).unwrap();
        assert_eq!(record.output_dir, f.dir.path().join("custom"));
        let delivery = f.queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(delivery.item.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_submit_rejects_bad_input() {
        let f = fixture();
        let input = video(f.dir.path(), "a.mp4");

        assert!(matches!(
            f.service.submit(SubmitRequest::new(vec![], 2)),
            Err(SubmitError::NoInputFiles)
        ));
        assert!(matches!(
            f.service.submit(SubmitRequest::new(vec![input.clone()], 0)),
            Err(SubmitError::InvalidFrameInterval(0))
        ));
        assert!(matches!(
            f.service.submit(SubmitRequest::new(vec![input], -4)),
            Err(SubmitError::InvalidFrameInterval(-4))
        ));
        assert!(matches!(
            f.service
                .submit(SubmitRequest::new(vec![f.dir.path().join("missing.mp4")], 2)),
            Err(SubmitError::UnreadableInput { .. })
        ));

        assert!(f.store.is_empty());
        assert_eq!(f.queue.pending().unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_submit_rejects_directory() {
        let f = fixture();
        assert!(matches!(
            f.service
                .submit(SubmitRequest::new(vec![f.dir.path().to_path_buf()], 2)),
            Err(SubmitError::NotAFile(_))
        ));
    }

    struct BrokenQueue;

    impl WorkQueue for BrokenQueue {
        fn enqueue(&self, _item: &crate::job::WorkItem) -> Result<(), QueueError> {
            Err(QueueError::LockPoisoned)
        }
        fn dequeue(&self, _wait: Duration) -> Result<Option<Delivery>, QueueError> {
            Ok(None)
        }
        fn ack(&self, _delivery: &Delivery) -> Result<bool, QueueError> {
            Ok(false)
        }
        fn release(&self, _delivery: &Delivery) -> Result<(), QueueError> {
            Ok(())
        }
        fn pending(&self) -> Result<usize, QueueError> {
            Ok(0)
        }
    }

    #[test]
    fn test_enqueue_failure_marks_record_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStateStore::new());
        let service = JobService::new(
            store.clone(),
            Arc::new(BrokenQueue),
            dir.path().join("out"),
            Duration::from_secs(60),
        );
        let input = video(dir.path(), "a.mp4");

        let err = service.submit(SubmitRequest::new(vec![input], 2)).unwrap_err();
        assert!(matches!(err, SubmitError::Queue(_)));

        assert_eq!(store.len(), 1);
        let job_dir = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let job_id = job_dir.file_name().to_string_lossy().to_string();
        let record = store.read(&job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.progress, 100);
    }

    #[test]
    fn test_read_status_unknown_job() {
        let f = fixture();
        assert!(matches!(
            f.service.read_status("nope"),
            Err(LookupError::JobNotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_resolve_artifact() {
        let f = fixture();
        let input = video(f.dir.path(), "a.mp4");
        let record = f.service.submit(SubmitRequest::new(vec![input], 2)).unwrap();

        let docx = record.output_dir.join("a.mp4.docx");
        std::fs::write(&docx, b"PK").unwrap();
        f.store
            .update(
                &record.job_id,
                &RecordUpdate::new().result_index(vec![
                    ResultEntry {
                        video: "a.mp4".to_string(),
                        docx_path: docx.to_string_lossy().to_string(),
                    },
                    ResultEntry {
                        video: "gone.mp4".to_string(),
                        docx_path: record
                            .output_dir
                            .join("gone.mp4.docx")
                            .to_string_lossy()
                            .to_string(),
                    },
                ]),
            )
            .unwrap();

        assert_eq!(f.service.resolve_artifact(&record.job_id, 0).unwrap(), docx);
        assert!(matches!(
            f.service.resolve_artifact(&record.job_id, 1),
            Err(LookupError::ArtifactMissing(_))
        ));
        assert!(matches!(
            f.service.resolve_artifact(&record.job_id, 2),
            Err(LookupError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(matches!(
            f.service.resolve_artifact("other", 0),
            Err(LookupError::JobNotFound(_))
        ));
    }
}
