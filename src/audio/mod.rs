//! # Audio Module
//!
//! Everything that touches raw samples before and after classification.
//!
//! ## Key Components:
//! - **Buffer**: decoded interleaved 16-bit PCM plus format (`AudioBuffer`)
//! - **Decode**: WAV/MP3 payload → `AudioBuffer`, chosen by file extension
//! - **Window**: lazy fixed-duration windowing over a buffer
//! - **Encode**: `AudioBuffer` → 16-bit PCM WAV bytes
//!
//! ## Format Handling:
//! No resampling and no channel conversion happen here. The sample rate and
//! channel layout of the upload are carried through to the exported WAV.

pub mod buffer;
pub mod decode;
pub mod encode;
pub mod window;

pub use buffer::AudioBuffer;
pub use decode::{decode, AudioFormat};
pub use encode::encode_wav;
pub use window::{Window, WindowSpan};
