use std::path::{Path, PathBuf};
use std::process::Command;

use super::command;
use super::{FrameSampler, SampledFrame};
use crate::error::StageError;
use crate::sanitize::redact_path;

const FRAME_PREFIX: &str = "frame_";
const FRAME_PATTERN: &str = "frame_%05d.jpg";

/// Samples JPEG frames at a fixed interval with ffmpeg's `fps` filter.
pub struct FfmpegFrameSampler {
    ffmpeg: PathBuf,
}

impl FfmpegFrameSampler {
    pub fn new(ffmpeg: &Path) -> Self {
        Self {
            ffmpeg: ffmpeg.to_path_buf(),
        }
    }
}

impl FrameSampler for FfmpegFrameSampler {
    fn sample(
        &self,
        video: &Path,
        frames_dir: &Path,
        interval_secs: u32,
    ) -> Result<Vec<SampledFrame>, StageError> {
        let _span = tracing::info_span!(
            "sample_frames",
            video = %redact_path(video),
            interval = interval_secs
        )
        .entered();

        if interval_secs == 0 {
            return Err(StageError::InvalidInput(
                "frame interval must be greater than zero".to_string(),
            ));
        }

        std::fs::create_dir_all(frames_dir).map_err(|source| StageError::Io {
            path: frames_dir.to_path_buf(),
            source,
        })?;
        // A previous attempt may have left frames behind; numbering restarts
        // at 1 so stale files would be mistaken for new ones.
        for stale in list_frames(frames_dir)? {
            std::fs::remove_file(&stale).map_err(|source| StageError::Io {
                path: stale.clone(),
                source,
            })?;
        }

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .arg("-hide_banner")
            .arg("-i")
            .arg(video)
            .arg("-vf")
            .arg(format!("fps=1/{interval_secs}"))
            .arg("-q:v")
            .arg("2")
            .arg(frames_dir.join(FRAME_PATTERN));
        command::run(&self.ffmpeg, cmd)?;

        let frames: Vec<SampledFrame> = list_frames(frames_dir)?
            .into_iter()
            .filter_map(|path| {
                let n = frame_number(&path)?;
                Some(SampledFrame {
                    second: n.saturating_sub(1) * u64::from(interval_secs),
                    path,
                })
            })
            .collect();

        tracing::debug!(count = frames.len(), "frames sampled");
        Ok(frames)
    }
}

/// Frame files in `dir`, sorted by their sequence number.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, StageError> {
    let pattern = format!(
        "{}/{}*.jpg",
        glob::Pattern::escape(&dir.to_string_lossy()),
        FRAME_PREFIX
    );
    let entries = glob::glob(&pattern)
        .map_err(|e| StageError::InvalidInput(format!("bad frame pattern: {e}")))?;

    let mut frames: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
    frames.sort_by_key(|p| frame_number(p).unwrap_or(u64::MAX));
    Ok(frames)
}

/// `frame_00007.jpg` → 7.
fn frame_number(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix(FRAME_PREFIX)?
        .parse()
        .ok()
}
