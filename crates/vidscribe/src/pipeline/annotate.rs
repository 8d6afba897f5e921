//! Turns transcript segments and captioned frames into document rows.

use crate::config::DocumentConfig;
use crate::stages::{CaptionedFrame, DocumentRow, Segment, TranscriptDocument};

pub const FALLBACK_VISION: &str = "No major visual change.";

/// Distinct captions of frames whose second falls within the segment's
/// whole-second span `[floor(start), floor(end)]`, in frame order, at most
/// `limit` of them.
pub fn captions_for_segment(
    segment: &Segment,
    frames: &[CaptionedFrame],
    limit: usize,
) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }
    let first = segment.start.max(0.0).floor() as u64;
    let last = segment.end.max(0.0).floor() as u64;

    let mut captions: Vec<String> = Vec::new();
    for frame in frames {
        if frame.second < first || frame.second > last {
            continue;
        }
        let Some(caption) = frame.caption.as_deref().map(str::trim) else {
            continue;
        };
        if caption.is_empty() || captions.iter().any(|c| c == caption) {
            continue;
        }
        captions.push(caption.to_string());
        if captions.len() == limit {
            break;
        }
    }
    captions
}

/// Segment start as `MMSS`: zero-padded whole minutes then seconds, no
/// separator.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() {
        seconds.max(0.0).floor() as u64
    } else {
        0
    };
    format!("{:02}{:02}", total / 60, total % 60)
}

pub fn build_rows(
    segments: &[Segment],
    frames: &[CaptionedFrame],
    config: &DocumentConfig,
) -> Vec<DocumentRow> {
    segments
        .iter()
        .map(|segment| {
            let captions = captions_for_segment(segment, frames, config.captions_per_segment);
            let vision = if captions.is_empty() {
                config.fallback_vision.clone()
            } else {
                captions.join(" ")
            };
            DocumentRow {
                time: format_timestamp(segment.start),
                sound: segment.text.clone(),
                vision,
                compliance: String::new(),
            }
        })
        .collect()
}

pub fn build_document(
    video_name: &str,
    segments: &[Segment],
    frames: &[CaptionedFrame],
    config: &DocumentConfig,
) -> TranscriptDocument {
    TranscriptDocument {
        title: video_name.to_string(),
        rows: build_rows(segments, frames, config),
    }
}
