use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::annotate::FALLBACK_VISION;
use crate::stages::ModelCommand;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file shared by the state store and the work queue. Defaults to
    /// `~/.vidscribe/data/vidscribe.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Parent directory for per-job output directories.
    pub output_root: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub media: MediaConfig,
    pub transcriber: ModelCommand,
    pub captioner: ModelCommand,
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

fn default_worker_count() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How often an idle worker re-checks the queue.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Deliveries beyond this count mark the job failed instead of running it.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Lease length for submissions that do not set their own timeout.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    3600
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_frame_interval")]
    pub default_frame_interval: u32,
    #[serde(default)]
    pub keep_intermediates: bool,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_frame_interval() -> u32 {
    2
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            default_frame_interval: default_frame_interval(),
            keep_intermediates: false,
        }
    }
}

/// How rows of the output document are assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConfig {
    #[serde(default = "default_captions_per_segment")]
    pub captions_per_segment: usize,
    /// Vision cell text for segments with no usable caption.
    #[serde(default = "default_fallback_vision")]
    pub fallback_vision: String,
}

fn default_captions_per_segment() -> usize {
    2
}

fn default_fallback_vision() -> String {
    FALLBACK_VISION.to_string()
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            captions_per_segment: default_captions_per_segment(),
            fallback_vision: default_fallback_vision(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
