use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default lease length for a job when the producer does not specify one.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Parameters captured at submission and fixed for the job's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameters {
    /// Seconds between sampled frames. Always greater than zero.
    pub frame_interval: u32,
    /// How long a worker may hold the job before it is redelivered.
    pub timeout: Duration,
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            frame_interval: 2,
            timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

/// One submitted batch of videos processed under shared parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub input_files: Vec<PathBuf>,
    pub output_directory: PathBuf,
    pub parameters: JobParameters,
}

impl Job {
    /// Generates a fresh job identifier. Identity always comes from the
    /// producer, never from the queue.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn total_files(&self) -> usize {
        self.input_files.len()
    }

    pub fn from_work_item(item: WorkItem) -> Self {
        Self {
            id: item.job_id,
            input_files: item.video_paths.into_iter().map(PathBuf::from).collect(),
            output_directory: PathBuf::from(item.output_dir),
            parameters: JobParameters {
                frame_interval: item.frame_interval,
                timeout: item.timeout,
            },
        }
    }

    pub fn to_work_item(&self) -> WorkItem {
        WorkItem {
            job_id: self.id.clone(),
            video_paths: self
                .input_files
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
            output_dir: self.output_directory.to_string_lossy().to_string(),
            frame_interval: self.parameters.frame_interval,
            timeout: self.parameters.timeout,
        }
    }
}

/// Wire form of a job execution request as carried by the work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: String,
    pub video_paths: Vec<String>,
    pub output_dir: String,
    pub frame_interval: u32,
    pub timeout: Duration,
}

/// Display name of an input file, as stored in the result index.
pub fn video_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
