//! # Windowing
//!
//! Slices an `AudioBuffer` into consecutive, non-overlapping windows of a fixed
//! duration. Windows are produced lazily and borrow their samples from the
//! buffer, so a 10-minute recording is never copied just to be segmented.
//!
//! ## Guarantees:
//! - Windows are yielded in ascending time order with no gaps and no overlaps
//! - Together they cover exactly `[0, total_duration)`
//! - There are `ceil(total_duration / segment_duration)` windows
//! - Window `k` starts at the frame holding time `k * segment_duration`, so
//!   boundaries never drift when a segment is not a whole number of frames
//! - The last window is truncated (never padded)
//! - A zero-length buffer yields no windows
//! - The iterator is `Clone`, so a sequence can be restarted from any point

use crate::audio::buffer::AudioBuffer;
use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::Serialize;
use std::time::Duration;

/// Position of one window inside its source buffer, detached from the samples.
///
/// The orchestrator keeps spans after feature extraction so classifications
/// can be mapped back to absolute frame ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSpan {
    pub index: usize,
    pub start_frame: usize,
    pub end_frame: usize,
}

impl WindowSpan {
    pub fn frames(&self) -> usize {
        self.end_frame - self.start_frame
    }
}

/// One window of audio, borrowing its interleaved samples.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub index: usize,
    pub start_frame: usize,
    pub end_frame: usize,
    pub samples: &'a [i16],
    pub sample_rate: u32,
    pub channels: u16,
}

impl<'a> Window<'a> {
    pub fn span(&self) -> WindowSpan {
        WindowSpan {
            index: self.index,
            start_frame: self.start_frame,
            end_frame: self.end_frame,
        }
    }

    pub fn frames(&self) -> usize {
        self.end_frame - self.start_frame
    }
}

/// Lazy, restartable sequence of windows over one buffer.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    buffer: &'a AudioBuffer,
    segment_nanos: u128,
    count: usize,
    next_index: usize,
}

impl<'a> Windows<'a> {
    /// Frame holding time `index * segment`, clamped to the buffer.
    fn boundary(&self, index: usize) -> usize {
        let frame = index as u128 * self.segment_nanos * self.buffer.sample_rate() as u128 / NANOS_PER_SEC;
        frame.min(self.buffer.frames() as u128) as usize
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.count {
            return None;
        }
        let start_frame = self.boundary(self.next_index);
        let end_frame = self.boundary(self.next_index + 1);

        let window = Window {
            index: self.next_index,
            start_frame,
            end_frame,
            samples: self.buffer.frame_slice(start_frame, end_frame),
            sample_rate: self.buffer.sample_rate(),
            channels: self.buffer.channels(),
        };
        self.next_index += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count.saturating_sub(self.next_index);
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for Windows<'a> {}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Checks that `segment` spans at least one frame at `sample_rate`.
///
/// ## Errors:
/// `InvalidInput` when the segment is zero, the rate is zero, or the segment is
/// shorter than a single frame at that rate.
fn check_segment(segment: Duration, sample_rate: u32) -> PipelineResult<()> {
    if segment.is_zero() {
        return Err(PipelineError::InvalidInput(
            "Segment duration must be greater than 0".to_string(),
        ));
    }
    if sample_rate == 0 {
        return Err(PipelineError::InvalidInput(
            "Audio has a sample rate of 0".to_string(),
        ));
    }

    if segment.as_nanos() * (sample_rate as u128) < NANOS_PER_SEC {
        return Err(PipelineError::InvalidInput(format!(
            "Segment duration {:?} is shorter than one frame at {} Hz",
            segment, sample_rate
        )));
    }
    Ok(())
}

impl AudioBuffer {
    /// Window this buffer into `segment`-long pieces.
    pub fn windows(&self, segment: Duration) -> PipelineResult<Windows<'_>> {
        check_segment(segment, self.sample_rate())?;
        let segment_nanos = segment.as_nanos();
        // ceil(duration / segment), with duration = frames / rate
        let count = (self.frames() as u128 * NANOS_PER_SEC).div_ceil(segment_nanos * self.sample_rate() as u128);
        Ok(Windows {
            buffer: self,
            segment_nanos,
            count: count as usize,
            next_index: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(frames: usize, sample_rate: u32) -> AudioBuffer {
        let samples = (0..frames).map(|i| (i % 1000) as i16).collect();
        AudioBuffer::new(samples, sample_rate, 1).unwrap()
    }

    #[test]
    fn test_window_count_is_ceiling_of_duration_over_segment() {
        let segment = Duration::from_millis(500);
        // 1 kHz keeps frames == milliseconds, which makes the arithmetic readable.
        for duration_ms in [1usize, 499, 500, 501, 999, 1000, 2000, 2250, 7001] {
            let buffer = mono(duration_ms, 1000);
            let windows: Vec<_> = buffer.windows(segment).unwrap().collect();
            assert_eq!(windows.len(), duration_ms.div_ceil(500), "duration {}ms", duration_ms);
        }
    }

    #[test]
    fn test_windows_are_contiguous_and_cover_buffer() {
        let buffer = mono(16000 * 2 + 1234, 16000);
        let windows: Vec<_> = buffer.windows(Duration::from_millis(500)).unwrap().collect();

        assert_eq!(windows.first().unwrap().start_frame, 0);
        assert_eq!(windows.last().unwrap().end_frame, buffer.frames());
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end_frame, pair[1].start_frame);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
        for window in &windows[..windows.len() - 1] {
            assert_eq!(window.frames(), 8000);
        }
        assert_eq!(windows.last().unwrap().frames(), 1234);
    }

    fn spans(buffer: &AudioBuffer, segment_ms: u64) -> Vec<(usize, usize)> {
        buffer
            .windows(Duration::from_millis(segment_ms))
            .unwrap()
            .map(|w| (w.start_frame, w.end_frame))
            .collect()
    }

    #[test]
    fn test_fractional_segment_does_not_drift() {
        // 500 ms at 11025 Hz is 5512.5 frames.
        let buffer = mono(22050, 11025);
        assert_eq!(
            spans(&buffer, 500),
            vec![(0, 5512), (5512, 11025), (11025, 16537), (16537, 22050)]
        );
        assert_eq!(buffer.windows(Duration::from_millis(500)).unwrap().len(), 4);
    }

    #[test]
    fn test_odd_segment_length_keeps_ceiling_count() {
        // 333 ms at 16 kHz is 5328 frames; one second needs four windows.
        let buffer = mono(16000, 16000);
        assert_eq!(
            spans(&buffer, 333),
            vec![(0, 5328), (5328, 10656), (10656, 15984), (15984, 16000)]
        );

        // Three seconds at 11025 Hz with 333 ms segments: ceil(3000 / 333) = 10.
        let buffer = mono(33075, 11025);
        let windows = spans(&buffer, 333);
        assert_eq!(windows.len(), 10);
        assert_eq!(windows.last().unwrap().1, 33075);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
            assert!(pair[0].0 < pair[0].1);
        }
    }

    #[test]
    fn test_window_samples_are_borrowed_slices_of_the_buffer() {
        let samples: Vec<i16> = (0..12).collect();
        let buffer = AudioBuffer::new(samples, 4, 2).unwrap();
        let windows: Vec<_> = buffer.windows(Duration::from_millis(500)).unwrap().collect();

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].samples, &[0, 1, 2, 3]);
        assert_eq!(windows[2].samples, &[8, 9, 10, 11]);
    }

    #[test]
    fn test_empty_buffer_yields_no_windows() {
        let buffer = mono(0, 16000);
        assert_eq!(buffer.windows(Duration::from_millis(500)).unwrap().count(), 0);
    }

    #[test]
    fn test_invalid_segment_or_rate_is_rejected() {
        let buffer = mono(100, 16000);
        assert!(matches!(
            buffer.windows(Duration::ZERO),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            buffer.windows(Duration::from_nanos(10)),
            Err(PipelineError::InvalidInput(_))
        ));

        let zero_rate = AudioBuffer::new(vec![0; 100], 0, 1).unwrap();
        assert!(matches!(
            zero_rate.windows(Duration::from_millis(500)),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sequence_is_restartable() {
        let buffer = mono(2500, 1000);
        let mut windows = buffer.windows(Duration::from_millis(500)).unwrap();
        windows.next();
        let checkpoint = windows.clone();
        assert_eq!(windows.len(), 4);

        let rest: Vec<_> = windows.map(|w| w.span()).collect();
        let replay: Vec<_> = checkpoint.map(|w| w.span()).collect();
        assert_eq!(rest, replay);
        assert_eq!(rest[0].index, 1);
    }
}
