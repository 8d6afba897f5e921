use std::path::{Path, PathBuf};
use std::process::Command;

use super::command;
use super::AudioExtractor;
use crate::error::StageError;
use crate::sanitize::redact_path;

const SAMPLE_RATE: u32 = 16_000;

/// Extracts a mono 16 kHz WAV track with ffmpeg.
pub struct FfmpegAudioExtractor {
    ffmpeg: PathBuf,
}

impl FfmpegAudioExtractor {
    pub fn new(ffmpeg: &Path) -> Self {
        Self {
            ffmpeg: ffmpeg.to_path_buf(),
        }
    }
}

impl AudioExtractor for FfmpegAudioExtractor {
    fn extract(&self, video: &Path, output: &Path) -> Result<PathBuf, StageError> {
        let _span = tracing::info_span!("extract_audio", video = %redact_path(video)).entered();

        if !video.is_file() {
            return Err(StageError::InvalidInput(format!(
                "video '{}' does not exist",
                video.display()
            )));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // ffmpeg writes to a sibling file; only a complete track is moved
        // into place.
        let partial = partial_path(output);
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .arg("-hide_banner")
            .arg("-i")
            .arg(video)
            .arg("-vn")
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg(SAMPLE_RATE.to_string())
            .arg("-f")
            .arg("wav")
            .arg(&partial);

        if let Err(e) = command::run(&self.ffmpeg, cmd) {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        if !partial.is_file() {
            return Err(StageError::MissingOutput(partial));
        }

        std::fs::rename(&partial, output).map_err(|source| {
            let _ = std::fs::remove_file(&partial);
            StageError::Io {
                path: output.to_path_buf(),
                source,
            }
        })?;

        tracing::debug!(output = %redact_path(output), "audio extracted");
        Ok(output.to_path_buf())
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}
