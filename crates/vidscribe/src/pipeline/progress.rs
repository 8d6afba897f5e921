use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobProgressEvent, JobProgressTracker};
use crate::job::{FileError, JobStatus};
use crate::stages::Stage;

/// Cumulative share of a file's progress slice reached once `stage` is done.
pub fn stage_weight(stage: Stage) -> u32 {
    match stage {
        Stage::ExtractAudio => 20,
        Stage::Transcribe => 40,
        Stage::SampleFrames => 60,
        Stage::Caption => 85,
        Stage::Render => 100,
    }
}

/// Progress range owned by the file at 0-based `index` out of `total`.
pub fn file_slice(index: usize, total: usize) -> (u8, u8) {
    if total == 0 {
        return (100, 100);
    }
    let index = index.min(total);
    let start = index * 100 / total;
    let end = (index + 1).min(total) * 100 / total;
    (start as u8, end as u8)
}

/// Overall job progress once `stage` has finished for the file at `index`.
pub fn progress_after(stage: Stage, index: usize, total: usize) -> u8 {
    let (start, end) = file_slice(index, total);
    let span = u32::from(end - start);
    start + (span * stage_weight(stage) / 100) as u8
}

/// Events emitted by the coordinator, mirrored from its store writes.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        progress: u8,
        done_files: u32,
        message: String,
    },
    StageCompleted {
        video: String,
        stage: Stage,
        progress: u8,
        done_files: u32,
        message: String,
    },
    FileFinished {
        video: String,
        progress: u8,
        done_files: u32,
        failure: Option<FileError>,
    },
    Finished {
        status: JobStatus,
        done_files: u32,
        message: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for callers without a live feed.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges coordinator events to the broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(
        job_id: &str,
        total_files: u32,
        sender: Arc<broadcast::Sender<JobProgressEvent>>,
    ) -> Self {
        Self {
            tracker: JobProgressTracker::new(job_id, total_files, sender),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started {
                progress,
                done_files,
                message,
            } => self.tracker.started(progress, done_files, &message),
            ProgressEvent::StageCompleted {
                video,
                stage,
                progress,
                done_files,
                message,
            } => self
                .tracker
                .stage_completed(&video, stage, progress, done_files, &message),
            ProgressEvent::FileFinished {
                video,
                progress,
                done_files,
                failure: None,
            } => self.tracker.file_completed(&video, progress, done_files),
            ProgressEvent::FileFinished {
                video,
                progress,
                done_files,
                failure: Some(failure),
            } => self.tracker.file_failed(
                &video,
                failure.stage,
                &failure.message,
                progress,
                done_files,
            ),
            ProgressEvent::Finished {
                status,
                done_files,
                message,
            } => self.tracker.finished(status, done_files, &message),
        }
    }
}
