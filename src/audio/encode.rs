//! WAV export of (redacted) audio as 16-bit PCM, keeping the buffer's sample
//! rate and channel count.

use crate::audio::buffer::AudioBuffer;
use crate::pipeline::error::{PipelineError, PipelineResult};
use std::io::Cursor;

pub const OUTPUT_BITS_PER_SAMPLE: u16 = 16;

/// Encode `buffer` into a complete RIFF/WAV file in memory.
pub fn encode_wav(buffer: &AudioBuffer) -> PipelineResult<Vec<u8>> {
    if buffer.sample_rate() == 0 {
        return Err(PipelineError::Export(
            "Cannot encode audio with a sample rate of 0".to_string(),
        ));
    }

    let header = wav::Header::new(
        wav::WAV_FORMAT_PCM,
        buffer.channels(),
        buffer.sample_rate(),
        OUTPUT_BITS_PER_SAMPLE,
    );
    let data = wav::BitDepth::Sixteen(buffer.samples().to_vec());

    let mut out = Cursor::new(Vec::with_capacity(44 + buffer.samples().len() * 2));
    wav::write(header, &data, &mut out)
        .map_err(|e| PipelineError::Export(format!("Failed to write WAV data: {}", e)))?;

    Ok(out.into_inner())
}
