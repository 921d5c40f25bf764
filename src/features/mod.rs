//! # Feature Extraction
//!
//! Turns one window of raw samples into one fixed-length `FeatureVector`, the
//! only input the classifiers understand.
//!
//! ## Failure Policy:
//! Extraction errors are per window. The orchestrator drops the failing window
//! from the classification batch, records it as unscored and carries on; a
//! single bad window never aborts a job.

pub mod mfcc;

use crate::audio::Window;
use serde::Serialize;
use thiserror::Error;

pub use mfcc::{MfccConfig, MfccExtractor};

/// Features computed from exactly one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    /// Index of the window these features describe.
    pub window_index: usize,
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Why a single window could not be scored.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureExtractionError {
    #[error("window {0} contains no samples")]
    EmptyWindow(usize),

    #[error("window {window_index} has an unusable sample rate of {sample_rate} Hz")]
    InvalidSampleRate { window_index: usize, sample_rate: u32 },

    #[error("window {window_index} produced a non-finite value at coefficient {coefficient}")]
    NonFinite { window_index: usize, coefficient: usize },

    #[error("window {window_index} produced {actual} values, expected {expected}")]
    Dimensionality {
        window_index: usize,
        expected: usize,
        actual: usize,
    },
}

/// A window → feature vector transform.
///
/// Implementations are shared across jobs behind an `Arc`, so they must be
/// `Send + Sync` and must not keep per-call mutable state outside of locks.
pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Length of every vector this extractor returns.
    fn dimensionality(&self) -> usize;

    fn extract(&self, window: &Window<'_>) -> Result<FeatureVector, FeatureExtractionError>;
}
