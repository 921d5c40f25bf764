//! # Classifier Adapter
//!
//! Wraps a pre-loaded binary model behind the `Classifier` trait: a batch of
//! feature vectors goes in, one `Classification` per vector comes out, in the
//! same order and carrying the same window index.
//!
//! ## Key Components:
//! - **Classifier**: the `predict` capability every model variant implements
//! - **CandleClassifier** (`model`): dense network loaded from safetensors
//! - **ModelRegistry** (`registry`): variant → loaded extractor/classifier pair
//! - **predict_with_timeout**: runs one batch with a deadline so a stuck model
//!   can never block a job forever

pub mod model;
pub mod registry;

use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use model::CandleClassifier;
pub use registry::{ModelRegistry, VariantBinding};

/// Output index that means "contains disallowed content".
pub const FLAGGED_CLASS: usize = 1;

/// Decision for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub window_index: usize,
    pub predicted_class: usize,
    pub scores: Vec<f32>,
}

impl Classification {
    /// Build a classification by taking the argmax of `scores`.
    ///
    /// Ties resolve to the lowest class index.
    pub fn from_scores(window_index: usize, scores: Vec<f32>) -> Result<Self, ClassificationError> {
        if scores.is_empty() {
            return Err(ClassificationError::Inference(format!(
                "model returned no scores for window {}",
                window_index
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ClassificationError::Inference(format!(
                "model returned a non-finite score for window {}",
                window_index
            )));
        }

        let mut predicted_class = 0;
        for (class, score) in scores.iter().enumerate() {
            if *score > scores[predicted_class] {
                predicted_class = class;
            }
        }

        Ok(Self {
            window_index,
            predicted_class,
            scores,
        })
    }

    pub fn is_flagged(&self) -> bool {
        self.predicted_class == FLAGGED_CLASS
    }
}

/// Batch-level classifier failures. Any of these fails the whole job.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassificationError {
    #[error("feature vector for window {window_index} has {actual} values, model expects {expected}")]
    DimensionMismatch {
        window_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("model returned {actual} classifications for a batch of {expected}")]
    BatchLength { expected: usize, actual: usize },

    #[error("classification {position} is for window {actual}, expected window {expected}")]
    Misaligned {
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("inference worker exited without a result")]
    WorkerLost,
}

/// A binary classifier over fixed-width feature vectors.
///
/// ## Contract:
/// - Output length and order equal the input batch
/// - Each output copies `window_index` from its input
/// - An empty batch returns an empty result
/// - Implementations are read-only after construction and shared across jobs
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Feature vector length this model accepts.
    fn input_width(&self) -> usize;

    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<Classification>, ClassificationError>;
}

/// Reject vectors whose length does not match the model input.
pub fn check_input_width(batch: &[FeatureVector], width: usize) -> Result<(), ClassificationError> {
    match batch.iter().find(|fv| fv.len() != width) {
        Some(fv) => Err(ClassificationError::DimensionMismatch {
            window_index: fv.window_index,
            expected: width,
            actual: fv.len(),
        }),
        None => Ok(()),
    }
}

/// Run `classifier.predict` on a worker thread, giving up after `timeout`.
///
/// The result is checked against the batch before it is returned: same
/// length, same window order. A timed-out worker is left to finish on its own;
/// its result is discarded.
///
/// `held` moves into the worker and is dropped only when `predict` actually
/// returns, so a job's concurrency slot stays taken while a timed-out call is
/// still burning CPU.
pub fn predict_with_timeout<H: Send + 'static>(
    classifier: Arc<dyn Classifier>,
    batch: Vec<FeatureVector>,
    timeout: Duration,
    held: H,
) -> Result<Vec<Classification>, ClassificationError> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    check_input_width(&batch, classifier.input_width())?;

    let expected: Vec<usize> = batch.iter().map(|fv| fv.window_index).collect();
    let (tx, rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("classifier".to_string())
        .spawn(move || {
            let result = classifier.predict(&batch);
            drop(held);
            // The receiver is gone when the caller already timed out.
            let _ = tx.send(result);
        })
        .map_err(|e| ClassificationError::Inference(format!("failed to start worker: {}", e)))?;

    let classifications = match rx.recv_timeout(timeout) {
        Ok(result) => result?,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Classifier batch timed out");
            return Err(ClassificationError::Timeout(timeout));
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => return Err(ClassificationError::WorkerLost),
    };

    if classifications.len() != expected.len() {
        return Err(ClassificationError::BatchLength {
            expected: expected.len(),
            actual: classifications.len(),
        });
    }
    for (position, (classification, window_index)) in classifications.iter().zip(&expected).enumerate() {
        if classification.window_index != *window_index {
            return Err(ClassificationError::Misaligned {
                position,
                expected: *window_index,
                actual: classification.window_index,
            });
        }
    }

    Ok(classifications)
}

/// Selectable classification path.
///
/// Both variants share windowing and redaction; they differ in the trained
/// weights behind the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    Audio,
    Text,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 2] = [ModelVariant::Audio, ModelVariant::Text];

    /// Name shown to users of the upload form.
    pub fn label(&self) -> &'static str {
        match self {
            ModelVariant::Audio => "Audio Model",
            ModelVariant::Text => "Text Model",
        }
    }
}

impl std::str::FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "audio" | "audio model" | "audio-model" | "audio_model" => Ok(ModelVariant::Audio),
            "text" | "text model" | "text-model" | "text_model" => Ok(ModelVariant::Text),
            _ => Err(format!("Unknown model variant: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelVariant::Audio => "audio",
            ModelVariant::Text => "text",
        };
        write!(f, "{}", name)
    }
}
