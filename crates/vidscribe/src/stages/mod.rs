//! Contracts for the external collaborators driven by the pipeline, plus the
//! production adapters (ffmpeg, long-lived model processes, DOCX writer).

pub mod audio;
mod command;
pub mod docx;
pub mod frames;
pub mod model;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::StageError;

pub use audio::FfmpegAudioExtractor;
pub use docx::DocxRenderer;
pub use frames::FfmpegFrameSampler;
pub use model::{ModelCaptioner, ModelClient, ModelCommand, ModelTranscriber};

/// The five per-file pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ExtractAudio,
    Transcribe,
    SampleFrames,
    Caption,
    Render,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::ExtractAudio,
        Stage::Transcribe,
        Stage::SampleFrames,
        Stage::Caption,
        Stage::Render,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::ExtractAudio => write!(f, "audio extraction"),
            Stage::Transcribe => write!(f, "transcription"),
            Stage::SampleFrames => write!(f, "frame sampling"),
            Stage::Caption => write!(f, "captioning"),
            Stage::Render => write!(f, "document rendering"),
        }
    }
}

/// A transcribed span of speech, in seconds from the start of the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledFrame {
    pub second: u64,
    pub path: PathBuf,
}

/// A sampled frame after captioning. `caption` is `None` when the
/// captioner failed for this frame or produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionedFrame {
    pub second: u64,
    pub caption: Option<String>,
}

/// One table row of the rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub time: String,
    pub sound: String,
    pub vision: String,
    pub compliance: String,
}

/// Everything the renderer needs for one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptDocument {
    pub title: String,
    pub rows: Vec<DocumentRow>,
}

/// Produces a mono 16 kHz audio file from a video.
///
/// Must fail instead of leaving a partial file at `output`.
pub trait AudioExtractor: Send + Sync {
    fn extract(&self, video: &Path, output: &Path) -> Result<PathBuf, StageError>;
}

/// Speech-to-text capability with an explicit lifecycle.
///
/// Implementations return segments ordered by start time, possibly empty.
pub trait Transcriber: Send + Sync {
    fn warm_up(&self) -> Result<(), StageError> {
        Ok(())
    }

    fn transcribe(&self, audio: &Path) -> Result<Vec<Segment>, StageError>;

    fn shutdown(&self) {}
}

/// Samples one frame every `interval_secs` seconds, starting at second 0.
pub trait FrameSampler: Send + Sync {
    fn sample(
        &self,
        video: &Path,
        frames_dir: &Path,
        interval_secs: u32,
    ) -> Result<Vec<SampledFrame>, StageError>;
}

/// Image captioning capability. Failure applies to the single frame only.
pub trait Captioner: Send + Sync {
    fn warm_up(&self) -> Result<(), StageError> {
        Ok(())
    }

    fn caption(&self, frame: &Path) -> Result<String, StageError>;

    fn shutdown(&self) {}
}

/// Writes the final document. Creates parent directories and may
/// overwrite an existing artifact.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, document: &TranscriptDocument, output: &Path) -> Result<PathBuf, StageError>;
}

/// The set of adapters a worker drives. Cloning shares the adapters.
#[derive(Clone)]
pub struct StageSet {
    pub audio: Arc<dyn AudioExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub frames: Arc<dyn FrameSampler>,
    pub captioner: Arc<dyn Captioner>,
    pub renderer: Arc<dyn DocumentRenderer>,
}

impl StageSet {
    /// Production adapters built from config. Models are not started until
    /// [`StageSet::warm_up`] is called.
    pub fn from_config(config: &Config) -> Self {
        let ffmpeg = PathBuf::from(&config.media.ffmpeg_path);
        Self {
            audio: Arc::new(FfmpegAudioExtractor::new(&ffmpeg)),
            transcriber: Arc::new(ModelTranscriber::new(config.transcriber.clone())),
            frames: Arc::new(FfmpegFrameSampler::new(&ffmpeg)),
            captioner: Arc::new(ModelCaptioner::new(config.captioner.clone())),
            renderer: Arc::new(DocxRenderer::new()),
        }
    }

    /// Starts the model capabilities. Called once by the worker process
    /// before it takes jobs.
    pub fn warm_up(&self) -> Result<(), StageError> {
        self.transcriber.warm_up()?;
        self.captioner.warm_up()?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.transcriber.shutdown();
        self.captioner.shutdown();
    }
}

/// Puts model output into the shape the pipeline relies on: finite times,
/// `start <= end`, sorted by start, no overlap between neighbours, trimmed
/// text.
pub fn normalize_segments(segments: Vec<Segment>) -> Vec<Segment> {
    let mut segments: Vec<Segment> = segments
        .into_iter()
        .filter(|s| s.start.is_finite() && s.end.is_finite())
        .map(|s| Segment {
            start: s.start.max(0.0),
            end: s.end.max(s.start).max(0.0),
            text: s.text.trim().to_string(),
        })
        .collect();
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut previous_end = 0.0_f64;
    for segment in &mut segments {
        if segment.start < previous_end {
            segment.start = previous_end;
        }
        if segment.end < segment.start {
            segment.end = segment.start;
        }
        previous_end = segment.end;
    }
    segments
}
