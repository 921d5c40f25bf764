//! # Redaction
//!
//! Maps per-window decisions back to absolute frame ranges, merges adjacent
//! flagged windows into intervals and writes silence over them.
//!
//! ## Merge Rules:
//! - One linear pass over windows in start order
//! - A flagged window whose start equals the open interval's end extends it
//! - A clean window, or a window that could not be scored, closes the interval
//! - Intervals are therefore disjoint, sorted and aligned to window boundaries
//!
//! ## Silence:
//! Every sample of every channel inside an interval becomes `0`. Samples
//! outside all intervals are copied unchanged, and the output keeps the
//! source's length, sample rate and channel layout.

use crate::audio::buffer::frames_to_duration;
use crate::audio::{AudioBuffer, WindowSpan};
use crate::classifier::Classification;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A window together with its decision, if it got one.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredWindow {
    pub span: WindowSpan,
    /// `None` when feature extraction failed for this window.
    pub classification: Option<Classification>,
}

impl ScoredWindow {
    pub fn is_flagged(&self) -> bool {
        self.classification
            .as_ref()
            .is_some_and(Classification::is_flagged)
    }
}

/// Half-open frame range `[start_frame, end_frame)` to be silenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlaggedInterval {
    pub start_frame: usize,
    pub end_frame: usize,
}

impl FlaggedInterval {
    pub fn frames(&self) -> usize {
        self.end_frame - self.start_frame
    }

    pub fn start(&self, sample_rate: u32) -> Duration {
        frames_to_duration(self.start_frame, sample_rate)
    }

    pub fn end(&self, sample_rate: u32) -> Duration {
        frames_to_duration(self.end_frame, sample_rate)
    }

    /// `[start_ms, end_ms)` for reports.
    pub fn to_millis(&self, sample_rate: u32) -> (u64, u64) {
        (
            self.start(sample_rate).as_millis() as u64,
            self.end(sample_rate).as_millis() as u64,
        )
    }
}

/// Intervals that cannot be applied to the buffer they were computed for.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RedactionError {
    #[error("interval [{start_frame}, {end_frame}) exceeds buffer of {total_frames} frames")]
    OutOfBounds {
        start_frame: usize,
        end_frame: usize,
        total_frames: usize,
    },

    #[error("interval starting at frame {start_frame} overlaps or precedes the previous interval ending at {previous_end}")]
    Unordered { start_frame: usize, previous_end: usize },

    #[error("interval at frame {0} is empty")]
    Empty(usize),
}

/// Redacted copy of a buffer plus the intervals that were silenced.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactedAudio {
    pub audio: AudioBuffer,
    pub intervals: Vec<FlaggedInterval>,
}

/// Coalesce flagged windows into sorted, disjoint intervals.
pub fn merge_flagged(windows: &[ScoredWindow]) -> Vec<FlaggedInterval> {
    let mut intervals: Vec<FlaggedInterval> = Vec::new();
    let mut open = false;

    for window in windows {
        if !window.is_flagged() {
            open = false;
            continue;
        }

        match intervals.last_mut() {
            Some(current) if open && current.end_frame == window.span.start_frame => {
                current.end_frame = window.span.end_frame;
            }
            _ => intervals.push(FlaggedInterval {
                start_frame: window.span.start_frame,
                end_frame: window.span.end_frame,
            }),
        }
        open = true;
    }

    intervals
}

/// Copy `source` and silence every interval.
pub fn apply_redaction(
    source: &AudioBuffer,
    intervals: &[FlaggedInterval],
) -> Result<RedactedAudio, RedactionError> {
    let total_frames = source.frames();
    let mut previous_end = 0;
    for (i, interval) in intervals.iter().enumerate() {
        if interval.end_frame <= interval.start_frame {
            return Err(RedactionError::Empty(interval.start_frame));
        }
        if interval.end_frame > total_frames {
            return Err(RedactionError::OutOfBounds {
                start_frame: interval.start_frame,
                end_frame: interval.end_frame,
                total_frames,
            });
        }
        if i > 0 && interval.start_frame < previous_end {
            return Err(RedactionError::Unordered {
                start_frame: interval.start_frame,
                previous_end,
            });
        }
        previous_end = interval.end_frame;
    }

    let mut audio = source.clone();
    let channels = source.channels() as usize;
    let samples = audio.samples_mut();
    for interval in intervals {
        samples[interval.start_frame * channels..interval.end_frame * channels].fill(0);
    }

    Ok(RedactedAudio {
        audio,
        intervals: intervals.to_vec(),
    })
}
