//! Scripted stage adapters.
//!
//! Every adapter appends `"<stage>:<file name>"` to a shared call log so
//! tests can assert which stages ran for which input. Failures are keyed by
//! a substring of the path the adapter receives.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vidscribe::error::{StageError, StoreError};
use vidscribe::job::{Job, JobProgressRecord, RecordUpdate};
use vidscribe::pipeline::{ProgressEvent, ProgressReporter};
use vidscribe::stages::{
    AudioExtractor, Captioner, DocumentRenderer, DocxRenderer, FrameSampler, SampledFrame,
    Segment, StageSet, TranscriptDocument, Transcriber,
};
use vidscribe::store::{JobStateStore, MemoryStateStore};

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, stage: &str, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.0.lock().unwrap().push(format!("{stage}:{name}"));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

fn should_fail(fail_on: &[String], path: &Path) -> bool {
    let path = path.to_string_lossy();
    fail_on.iter().any(|needle| path.contains(needle.as_str()))
}

fn scripted_failure(program: &str) -> StageError {
    StageError::CommandFailed {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "scripted failure".to_string(),
    }
}

pub struct FakeAudio {
    calls: CallLog,
    fail_on: Vec<String>,
}

impl AudioExtractor for FakeAudio {
    fn extract(&self, video: &Path, output: &Path) -> Result<PathBuf, StageError> {
        self.calls.push("audio", video);
        if should_fail(&self.fail_on, video) {
            return Err(scripted_failure("ffmpeg"));
        }
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(output, b"RIFF").unwrap();
        Ok(output.to_path_buf())
    }
}

pub struct FakeTranscriber {
    calls: CallLog,
    fail_on: Vec<String>,
    segments: Vec<Segment>,
}

impl Transcriber for FakeTranscriber {
    fn transcribe(&self, audio: &Path) -> Result<Vec<Segment>, StageError> {
        self.calls.push("transcribe", audio.parent().unwrap_or(audio));
        if should_fail(&self.fail_on, audio) {
            return Err(StageError::Model("scripted failure".to_string()));
        }
        Ok(self.segments.clone())
    }
}

/// Writes `count` frame files and reports them at `interval` spacing.
pub struct FakeFrames {
    calls: CallLog,
    count: u64,
}

impl FrameSampler for FakeFrames {
    fn sample(
        &self,
        video: &Path,
        frames_dir: &Path,
        interval_secs: u32,
    ) -> Result<Vec<SampledFrame>, StageError> {
        self.calls.push("frames", video);
        std::fs::create_dir_all(frames_dir).unwrap();
        Ok((0..self.count)
            .map(|i| {
                let path = frames_dir.join(format!("frame_{:05}.jpg", i + 1));
                std::fs::write(&path, b"jpg").unwrap();
                SampledFrame {
                    second: i * u64::from(interval_secs),
                    path,
                }
            })
            .collect())
    }
}

/// Captions each frame with its file name.
pub struct FakeCaptioner {
    fail_all: bool,
}

impl Captioner for FakeCaptioner {
    fn caption(&self, frame: &Path) -> Result<String, StageError> {
        if self.fail_all {
            return Err(StageError::Model("no vision today".to_string()));
        }
        let name = frame.file_stem().unwrap().to_string_lossy().to_string();
        Ok(format!("scene {name}"))
    }
}

/// Real DOCX renderer that can raise a cancel flag after `cancel_after`
/// documents.
pub struct InterruptingRenderer {
    calls: CallLog,
    rendered: AtomicUsize,
    cancel: Option<(Arc<AtomicBool>, usize)>,
}

impl DocumentRenderer for InterruptingRenderer {
    fn render(&self, document: &TranscriptDocument, output: &Path) -> Result<PathBuf, StageError> {
        self.calls.push("render", output);
        let path = DocxRenderer::new().render(document, output)?;
        let rendered = self.rendered.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((ref flag, after)) = self.cancel {
            if rendered >= after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(path)
    }
}

/// Builder for a `StageSet` of scripted adapters.
pub struct FakeStages {
    pub calls: CallLog,
    fail_audio: Vec<String>,
    fail_transcribe: Vec<String>,
    fail_captions: bool,
    frame_count: u64,
    segments: Vec<Segment>,
    cancel: Option<(Arc<AtomicBool>, usize)>,
}

impl FakeStages {
    pub fn new() -> Self {
        Self {
            calls: CallLog::default(),
            fail_audio: Vec::new(),
            fail_transcribe: Vec::new(),
            fail_captions: false,
            frame_count: 3,
            segments: default_segments(),
            cancel: None,
        }
    }

    pub fn fail_audio_for(mut self, needle: &str) -> Self {
        self.fail_audio.push(needle.to_string());
        self
    }

    pub fn fail_transcription_for(mut self, needle: &str) -> Self {
        self.fail_transcribe.push(needle.to_string());
        self
    }

    pub fn fail_captions(mut self) -> Self {
        self.fail_captions = true;
        self
    }

    pub fn segments(mut self, segments: Vec<Segment>) -> Self {
        self.segments = segments;
        self
    }

    pub fn cancel_after_renders(mut self, flag: Arc<AtomicBool>, renders: usize) -> Self {
        self.cancel = Some((flag, renders));
        self
    }

    pub fn build(&self) -> StageSet {
        StageSet {
            audio: Arc::new(FakeAudio {
                calls: self.calls.clone(),
                fail_on: self.fail_audio.clone(),
            }),
            transcriber: Arc::new(FakeTranscriber {
                calls: self.calls.clone(),
                fail_on: self.fail_transcribe.clone(),
                segments: self.segments.clone(),
            }),
            frames: Arc::new(FakeFrames {
                calls: self.calls.clone(),
                count: self.frame_count,
            }),
            captioner: Arc::new(FakeCaptioner {
                fail_all: self.fail_captions,
            }),
            renderer: Arc::new(InterruptingRenderer {
                calls: self.calls.clone(),
                rendered: AtomicUsize::new(0),
                cancel: self.cancel.clone(),
            }),
        }
    }
}

pub fn default_segments() -> Vec<Segment> {
    vec![
        Segment {
            start: 0.0,
            end: 2.5,
            text: "Welcome to the product tour.".to_string(),
        },
        Segment {
            start: 2.5,
            end: 4.0,
            text: "Prices & terms <apply>.".to_string(),
        },
    ]
}

/// Collects every progress event in order.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Memory store that snapshots the record after every successful update.
#[derive(Default)]
pub struct SnapshotStore {
    inner: MemoryStateStore,
    snapshots: Mutex<Vec<JobProgressRecord>>,
}

impl SnapshotStore {
    pub fn snapshots(&self) -> Vec<JobProgressRecord> {
        self.snapshots.lock().unwrap().clone()
    }
}

impl JobStateStore for SnapshotStore {
    fn initialize(&self, job: &Job) -> Result<JobProgressRecord, StoreError> {
        self.inner.initialize(job)
    }

    fn update(&self, job_id: &str, update: &RecordUpdate) -> Result<(), StoreError> {
        self.inner.update(job_id, update)?;
        if let Some(record) = self.inner.read(job_id)? {
            self.snapshots.lock().unwrap().push(record);
        }
        Ok(())
    }

    fn read(&self, job_id: &str) -> Result<Option<JobProgressRecord>, StoreError> {
        self.inner.read(job_id)
    }
}
