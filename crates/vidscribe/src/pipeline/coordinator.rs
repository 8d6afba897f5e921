//! Drives one job through the per-file stages and keeps the job's progress
//! record current.
//!
//! Files run in submission order and stages in fixed order. A stage failure
//! ends that file only: it is recorded in the error list, `done_files`
//! advances and the next file starts. Only state store failures and
//! cancellation end the run early.
//!
//! Runs are resumable. The record's `done_files` says how many files are
//! already settled, so a redelivered job continues with the next file and
//! keeps the recorded results and errors. A job whose record is terminal is
//! left untouched.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::config::DocumentConfig;
use crate::error::StageError;
use crate::job::{
    video_name, FileError, Job, JobProgressRecord, JobStatus, RecordUpdate, ResultEntry,
};
use crate::sanitize::redact_path;
use crate::stages::{CaptionedFrame, Stage, StageSet};
use crate::store::JobStateStore;

use super::annotate;
use super::error::CoordinatorError;
use super::progress::{file_slice, progress_after, ProgressEvent, ProgressReporter};

const WORK_DIR: &str = "work";

#[derive(Debug, Clone, Default)]
pub struct CoordinatorSettings {
    pub document: DocumentConfig,
    /// Keep per-file audio and frames after the file succeeds.
    pub keep_intermediates: bool,
}

/// What a run did. `status` is the record's status when the run returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub total_files: u32,
    pub succeeded: usize,
    pub failed: usize,
    /// Index of the first file processed by this run.
    pub resumed_from: u32,
    /// The record was already terminal; nothing was done.
    pub already_finished: bool,
}

enum FileFailure {
    Stage { stage: Stage, source: StageError },
    Abort(CoordinatorError),
}

impl From<CoordinatorError> for FileFailure {
    fn from(e: CoordinatorError) -> Self {
        FileFailure::Abort(e)
    }
}

/// Per-file state threaded through the stage steps.
struct FileRun<'a> {
    job: &'a Job,
    index: usize,
    total: usize,
    video: String,
    document: PathBuf,
    done_files: u32,
    progress: &'a dyn ProgressReporter,
    cancel: &'a AtomicBool,
}

pub struct Coordinator {
    store: Arc<dyn JobStateStore>,
    stages: StageSet,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn JobStateStore>,
        stages: StageSet,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            stages,
            settings,
        }
    }

    pub fn run(
        &self,
        job: &Job,
        progress: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<RunSummary, CoordinatorError> {
        let _job_span = info_span!("job", job_id = %job.id, files = job.total_files()).entered();

        if job.input_files.is_empty() {
            return Err(CoordinatorError::InvalidJob {
                job_id: job.id.clone(),
                reason: "no input files".to_string(),
            });
        }

        let record = self.load_record(job)?;
        let total = job.total_files();

        if record.is_terminal() {
            info!(status = %record.status, "job already finished, skipping");
            return Ok(RunSummary {
                job_id: job.id.clone(),
                status: record.status,
                total_files: record.total_files,
                succeeded: record.result_index.len(),
                failed: record.errors.len(),
                resumed_from: record.done_files,
                already_finished: true,
            });
        }

        let resumed_from = record.done_files;
        let mut results = record.result_index;
        let mut errors = record.errors;

        let message = if resumed_from == 0 {
            "Job started".to_string()
        } else {
            format!("Resuming at file {} of {}", resumed_from + 1, total)
        };
        self.store.update(
            &job.id,
            &RecordUpdate::new()
                .status(JobStatus::Running)
                .message(message.clone()),
        )?;
        progress.report(ProgressEvent::Started {
            progress: record.progress,
            done_files: resumed_from,
            message,
        });

        for (index, input) in job.input_files.iter().enumerate().skip(resumed_from as usize) {
            let file = FileRun {
                job,
                index,
                total,
                video: video_name(input),
                document: document_path(&job.output_directory, index, &job.input_files),
                done_files: index as u32,
                progress,
                cancel,
            };

            let failure = match self.process_file(&file, input) {
                Ok(entry) => {
                    results.push(entry);
                    None
                }
                Err(FileFailure::Stage { stage, source }) => {
                    warn!(video = %file.video, %stage, error = %source, "file failed");
                    let failure = FileError {
                        video: file.video.clone(),
                        stage,
                        message: source.to_string(),
                    };
                    errors.push(failure.clone());
                    Some(failure)
                }
                Err(FileFailure::Abort(e)) => return Err(e),
            };

            let done_files = index as u32 + 1;
            let (_, slice_end) = file_slice(index, total);
            let message = match failure {
                None => format!("Finished {} ({}/{})", file.video, done_files, total),
                Some(ref f) => format!(
                    "Failed {} during {} ({}/{})",
                    file.video, f.stage, done_files, total
                ),
            };
            self.store.update(
                &job.id,
                &RecordUpdate::new()
                    .done_files(done_files)
                    .progress(slice_end)
                    .result_index(results.clone())
                    .errors(errors.clone())
                    .message(message),
            )?;
            progress.report(ProgressEvent::FileFinished {
                video: file.video,
                progress: slice_end,
                done_files,
                failure,
            });
        }

        let (status, message) = completion(results.len(), errors.len(), total);
        self.store.update(
            &job.id,
            &RecordUpdate::new()
                .status(status)
                .progress(100)
                .message(message.clone()),
        )?;
        progress.report(ProgressEvent::Finished {
            status,
            done_files: total as u32,
            message: message.clone(),
        });

        // Only succeeds once every file's scratch directory is gone.
        let _ = std::fs::remove_dir(job.output_directory.join(WORK_DIR));

        info!(%status, succeeded = results.len(), failed = errors.len(), "{}", message);
        Ok(RunSummary {
            job_id: job.id.clone(),
            status,
            total_files: total as u32,
            succeeded: results.len(),
            failed: errors.len(),
            resumed_from,
            already_finished: false,
        })
    }

    fn load_record(&self, job: &Job) -> Result<JobProgressRecord, CoordinatorError> {
        match self.store.read(&job.id)? {
            Some(record) => {
                if record.total_files as usize != job.total_files() {
                    return Err(CoordinatorError::InvalidJob {
                        job_id: job.id.clone(),
                        reason: format!(
                            "record has {} files, work item has {}",
                            record.total_files,
                            job.total_files()
                        ),
                    });
                }
                Ok(record)
            }
            None => {
                warn!("no progress record found, initializing from work item");
                Ok(self.store.initialize(job)?)
            }
        }
    }

    fn process_file(&self, file: &FileRun<'_>, input: &Path) -> Result<ResultEntry, FileFailure> {
        let _file_span = info_span!(
            "file",
            index = file.index + 1,
            video = %redact_path(input)
        )
        .entered();

        let work_dir = scratch_dir(&file.job.output_directory, file.index, input);
        let video = &file.video;
        let n = file.index + 1;
        let total = file.total;

        let audio = self.stage(
            file,
            Stage::ExtractAudio,
            format!("Extracted audio from {video} ({n}/{total})"),
            || self.stages.audio.extract(input, &work_dir.join("audio.wav")),
        )?;

        let segments = self.stage(
            file,
            Stage::Transcribe,
            format!("Transcribed {video} ({n}/{total})"),
            || self.stages.transcriber.transcribe(&audio),
        )?;

        let frames = self.stage(
            file,
            Stage::SampleFrames,
            format!("Sampled frames from {video} ({n}/{total})"),
            || {
                self.stages.frames.sample(
                    input,
                    &work_dir.join("frames"),
                    file.job.parameters.frame_interval,
                )
            },
        )?;

        let captioned = self.stage(
            file,
            Stage::Caption,
            format!("Captioned frames from {video} ({n}/{total})"),
            || {
                Ok(frames
                    .iter()
                    .map(|frame| CaptionedFrame {
                        second: frame.second,
                        caption: self.caption_frame(&frame.path),
                    })
                    .collect::<Vec<_>>())
            },
        )?;

        let docx = self.stage(
            file,
            Stage::Render,
            format!("Generated DOCX for {video} ({n}/{total})"),
            || {
                let document = annotate::build_document(
                    video,
                    &segments,
                    &captioned,
                    &self.settings.document,
                );
                self.stages.renderer.render(&document, &file.document)
            },
        )?;

        if !self.settings.keep_intermediates {
            if let Err(e) = std::fs::remove_dir_all(&work_dir) {
                debug!(error = %e, "could not remove scratch directory");
            }
        }

        Ok(ResultEntry {
            video: video.clone(),
            docx_path: docx.to_string_lossy().to_string(),
        })
    }

    /// Runs one stage, then records the progress it reached.
    fn stage<T>(
        &self,
        file: &FileRun<'_>,
        stage: Stage,
        message: String,
        f: impl FnOnce() -> Result<T, StageError>,
    ) -> Result<T, FileFailure> {
        if file.cancel.load(Ordering::Relaxed) {
            return Err(CoordinatorError::Cancelled.into());
        }

        let value = {
            let _stage_span = info_span!("stage", %stage).entered();
            f().map_err(|source| FileFailure::Stage { stage, source })?
        };

        let progress = progress_after(stage, file.index, file.total);
        self.store
            .update(
                &file.job.id,
                &RecordUpdate::new().progress(progress).message(message.clone()),
            )
            .map_err(CoordinatorError::from)?;
        file.progress.report(ProgressEvent::StageCompleted {
            video: file.video.clone(),
            stage,
            progress,
            done_files: file.done_files,
            message,
        });
        Ok(value)
    }

    /// A frame that cannot be captioned contributes nothing; it never fails
    /// the file.
    fn caption_frame(&self, frame: &Path) -> Option<String> {
        match self.stages.captioner.caption(frame) {
            Ok(caption) if !caption.trim().is_empty() => Some(caption),
            Ok(_) => None,
            Err(e) => {
                warn!(frame = %redact_path(frame), error = %e, "caption failed");
                None
            }
        }
    }
}

/// `<output_dir>/work/<NNN>_<stem>`; the index prefix keeps two inputs with
/// the same name apart.
fn scratch_dir(output_dir: &Path, index: usize, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    output_dir
        .join(WORK_DIR)
        .join(format!("{:03}_{}", index + 1, stem))
}

/// `<output_dir>/<video>.docx`, or `<output_dir>/<NNN>_<video>.docx` when
/// another input in the job has the same file name.
fn document_path(output_dir: &Path, index: usize, inputs: &[PathBuf]) -> PathBuf {
    let video = video_name(&inputs[index]);
    let shared = inputs
        .iter()
        .enumerate()
        .any(|(i, other)| i != index && video_name(other) == video);
    if shared {
        output_dir.join(format!("{:03}_{}.docx", index + 1, video))
    } else {
        output_dir.join(format!("{video}.docx"))
    }
}

fn completion(succeeded: usize, failed: usize, total: usize) -> (JobStatus, String) {
    if failed == 0 {
        (JobStatus::Done, "All files processed".to_string())
    } else if succeeded == 0 {
        (JobStatus::Failed, format!("All {total} files failed"))
    } else {
        (
            JobStatus::Done,
            format!("Processed {succeeded} of {total} files; {failed} failed"),
        )
    }
}
