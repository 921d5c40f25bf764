//! # Decoded Audio Buffer
//!
//! Holds a fully decoded recording as interleaved 16-bit PCM. A buffer is
//! immutable once decoded: windowing and feature extraction only borrow from
//! it, and redaction produces a new buffer instead of editing this one.
//!
//! ## Layout:
//! - **Interleaved**: for stereo, samples are `L0 R0 L1 R1 ...`
//! - **Frame**: one sample per channel at one instant; all offsets are in frames
//! - **Duration**: `frames / sample_rate`

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::time::Duration;

/// Decoded PCM audio plus its format.
///
/// ## Rust Concepts:
/// - **Private fields**: the constructor enforces `samples.len() % channels == 0`,
///   so every slice taken by frame index is whole frames
/// - **#[derive(PartialEq)]**: lets tests compare buffers sample-for-sample
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Create a buffer from interleaved samples.
    ///
    /// A zero sample rate is accepted here so the windowing step can reject it
    /// with a precise error; a zero channel count or a partial trailing frame
    /// is rejected immediately.
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> PipelineResult<Self> {
        if channels == 0 {
            return Err(PipelineError::InvalidInput(
                "Audio must have at least one channel".to_string(),
            ));
        }
        if samples.len() % channels as usize != 0 {
            return Err(PipelineError::InvalidInput(format!(
                "Sample count {} is not a multiple of the channel count {}",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Digital silence of the given length.
    #[cfg(test)]
    pub fn silent(frames: usize, sample_rate: u32, channels: u16) -> PipelineResult<Self> {
        Self::new(vec![0; frames * channels as usize], sample_rate, channels)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Total duration. Zero when the sample rate is zero.
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames(), self.sample_rate)
    }

    /// Interleaved samples covering frames `[start, end)`.
    ///
    /// Callers pass ranges produced by windowing, which never exceed the buffer.
    pub fn frame_slice(&self, start: usize, end: usize) -> &[i16] {
        let channels = self.channels as usize;
        &self.samples[start * channels..end * channels]
    }

    /// Mutable access for redaction, which works on its own copy.
    pub(crate) fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }
}

/// Convert a frame count to a duration at `sample_rate`, rounding down to the nanosecond.
pub fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Frame offset of `millis` at `sample_rate`.
#[cfg(test)]
pub fn millis_to_frames(millis: u64, sample_rate: u32) -> usize {
    (millis as u128 * sample_rate as u128 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_geometry() {
        let buffer = AudioBuffer::new(vec![1, 2, 3, 4, 5, 6], 2, 2).unwrap();
        assert_eq!(buffer.frames(), 3);
        assert_eq!(buffer.duration(), Duration::from_millis(1500));
        assert_eq!(buffer.frame_slice(1, 3), &[3, 4, 5, 6]);
    }

    #[test]
    fn test_rejects_partial_frames_and_zero_channels() {
        assert!(AudioBuffer::new(vec![1, 2, 3], 16000, 2).is_err());
        assert!(AudioBuffer::new(vec![], 16000, 0).is_err());
    }

    #[test]
    fn test_zero_rate_has_zero_duration() {
        let buffer = AudioBuffer::new(vec![0; 10], 0, 1).unwrap();
        assert_eq!(buffer.duration(), Duration::ZERO);
    }

    #[test]
    fn test_millis_frames_conversion() {
        assert_eq!(millis_to_frames(500, 16000), 8000);
        assert_eq!(millis_to_frames(500, 44100), 22050);
        assert_eq!(frames_to_duration(8000, 16000), Duration::from_millis(500));
    }
}
