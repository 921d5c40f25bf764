//! # Audio Decoding
//!
//! Turns an uploaded WAV or MP3 payload into an `AudioBuffer`. The sample rate
//! and channel layout are kept exactly as the source provides them; nothing is
//! resampled or down-mixed here.
//!
//! ## Decoders:
//! - **WAV**: `wav` crate. 16-bit PCM passes through untouched; 8-bit, 24-bit
//!   and 32-bit float are converted to 16-bit.
//! - **MP3**: `symphonia`, decoded packet by packet into interleaved `i16`.

use crate::audio::buffer::AudioBuffer;
use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::Serialize;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Container formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    /// Pick the format from a filename's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> PipelineResult<Self> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            _ => Err(PipelineError::InvalidInput(format!(
                "Invalid file format for '{}'. Only WAV and MP3 are supported.",
                filename
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

/// Decode a complete payload of the given format.
pub fn decode(bytes: &[u8], format: AudioFormat) -> PipelineResult<AudioBuffer> {
    let buffer = match format {
        AudioFormat::Wav => decode_wav(bytes)?,
        AudioFormat::Mp3 => decode_mp3(bytes)?,
    };

    debug!(
        format = format.extension(),
        sample_rate = buffer.sample_rate(),
        channels = buffer.channels(),
        frames = buffer.frames(),
        "Decoded audio payload"
    );
    Ok(buffer)
}

fn decode_wav(bytes: &[u8]) -> PipelineResult<AudioBuffer> {
    let mut cursor = Cursor::new(bytes);
    let (header, data) = wav::read(&mut cursor)
        .map_err(|e| PipelineError::InvalidInput(format!("Failed to parse WAV file: {}", e)))?;

    let samples: Vec<i16> = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| ((s as i16) - 128) << 8)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples,
        wav::BitDepth::TwentyFour(samples) => samples.into_iter().map(|s| (s >> 8) as i16).collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples.into_iter().map(float_to_i16).collect(),
        wav::BitDepth::Empty => Vec::new(),
    };

    AudioBuffer::new(samples, header.sampling_rate, header.channel_count)
}

fn decode_mp3(bytes: &[u8]) -> PipelineResult<AudioBuffer> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PipelineError::InvalidInput(format!("Failed to probe MP3 payload: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PipelineError::InvalidInput("No audio track found".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::InvalidInput(format!("Failed to create MP3 decoder: {}", e)))?;

    let mut samples: Vec<i16> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(PipelineError::InvalidInput(format!(
                    "Failed to read MP3 packet: {}",
                    e
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                channels.get_or_insert(spec.channels.count() as u16);

                let mut converted = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                converted.copy_interleaved_ref(decoded);
                samples.extend_from_slice(converted.samples());
            }
            // A corrupt frame is skipped; the rest of the stream stays usable.
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable MP3 frame: {}", e);
            }
            Err(e) => {
                return Err(PipelineError::InvalidInput(format!(
                    "Failed to decode MP3 payload: {}",
                    e
                )));
            }
        }
    }

    let sample_rate = sample_rate
        .ok_or_else(|| PipelineError::InvalidInput("MP3 sample rate not found".to_string()))?;
    let channels = channels
        .ok_or_else(|| PipelineError::InvalidInput("MP3 channel count not found".to_string()))?;

    AudioBuffer::new(samples, sample_rate, channels)
}

fn float_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
