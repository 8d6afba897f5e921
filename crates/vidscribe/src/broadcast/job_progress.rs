//! Job progress broadcaster for live, in-process progress feeds.
//!
//! The state store is the source of truth for pollers. This channel only
//! mirrors what the coordinator writes, for consumers in the same process
//! (the CLI's `run` command logs from it).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::JobStatus;
use crate::stages::Stage;

/// What happened to produce an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Started,
    StageCompleted,
    FileCompleted,
    FileFailed,
    Finished,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Started => write!(f, "Started"),
            JobPhase::StageCompleted => write!(f, "Stage completed"),
            JobPhase::FileCompleted => write!(f, "File completed"),
            JobPhase::FileFailed => write!(f, "File failed"),
            JobPhase::Finished => write!(f, "Finished"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub phase: JobPhase,
    pub status: JobStatus,
    pub progress: u8,
    pub done_files: u32,
    pub total_files: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// File the event refers to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    /// Error message (set on file failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Broadcasts job progress events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn start_job(&self, job_id: &str, total_files: u32) -> JobProgressTracker {
        JobProgressTracker::new(job_id, total_files, Arc::clone(&self.sender))
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<JobProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Builds events for one job. Every event carries the full counters so a
/// subscriber that joins late still sees a consistent snapshot.
pub struct JobProgressTracker {
    job_id: String,
    total_files: u32,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(
        job_id: &str,
        total_files: u32,
        sender: Arc<broadcast::Sender<JobProgressEvent>>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            total_files,
            sender,
        }
    }

    fn event(
        &self,
        phase: JobPhase,
        status: JobStatus,
        progress: u8,
        done_files: u32,
        message: &str,
    ) -> JobProgressEvent {
        JobProgressEvent {
            job_id: self.job_id.clone(),
            phase,
            status,
            progress,
            done_files,
            total_files: self.total_files,
            message: message.to_string(),
            timestamp: Utc::now(),
            video: None,
            stage: None,
            error: None,
        }
    }

    pub fn started(&self, progress: u8, done_files: u32, message: &str) {
        let event = self.event(JobPhase::Started, JobStatus::Running, progress, done_files, message);
        let _ = self.sender.send(event);
    }

    pub fn stage_completed(
        &self,
        video: &str,
        stage: Stage,
        progress: u8,
        done_files: u32,
        message: &str,
    ) {
        let mut event = self.event(
            JobPhase::StageCompleted,
            JobStatus::Running,
            progress,
            done_files,
            message,
        );
        event.video = Some(video.to_string());
        event.stage = Some(stage);
        let _ = self.sender.send(event);
    }

    pub fn file_completed(&self, video: &str, progress: u8, done_files: u32) {
        let mut event = self.event(
            JobPhase::FileCompleted,
            JobStatus::Running,
            progress,
            done_files,
            &format!("Finished {video}"),
        );
        event.video = Some(video.to_string());
        let _ = self.sender.send(event);
    }

    pub fn file_failed(&self, video: &str, stage: Stage, error: &str, progress: u8, done_files: u32) {
        let mut event = self.event(
            JobPhase::FileFailed,
            JobStatus::Running,
            progress,
            done_files,
            &format!("{video} failed during {stage}"),
        );
        event.video = Some(video.to_string());
        event.stage = Some(stage);
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }

    pub fn finished(&self, status: JobStatus, done_files: u32, message: &str) {
        let event = self.event(JobPhase::Finished, status, 100, done_files, message);
        let _ = self.sender.send(event);
    }
}
