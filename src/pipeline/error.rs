//! # Pipeline Error Taxonomy
//!
//! Every failure the redaction pipeline can report, grouped by the stage that
//! produced it. Per-window feature extraction failures are *not* in this enum:
//! they are absorbed by the orchestrator (see `features::FeatureExtractionError`).
//! Everything here aborts the job it happened in.
//!
//! ## Kinds and where they come from:
//! - **InvalidInput**: bad upload, undecodable audio, zero-duration audio, bad settings
//! - **FeatureExtraction**: no window at all could be scored
//! - **Classification**: batch-level model failure (dimensionality, inference)
//! - **Timeout**: the classifier did not answer within its deadline
//! - **Redaction**: an interval does not fit the buffer (internal alignment bug)
//! - **Export**: the redacted buffer could not be encoded
//! - **NotFound**: unknown or evicted job id
//! - **Capacity**: too many jobs in flight
//! - **Internal**: a pipeline worker died without reporting (panic)

use crate::classifier::ClassificationError;
use crate::redaction::RedactionError;
use serde::Serialize;
use thiserror::Error;

/// Machine-readable error category, shared by `PipelineError` and `FailureReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    FeatureExtraction,
    Classification,
    Timeout,
    Redaction,
    Export,
    NotFound,
    Capacity,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::FeatureExtraction => "feature_extraction",
            ErrorKind::Classification => "classification",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Redaction => "redaction",
            ErrorKind::Export => "export",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a pipeline run (or reject it before it starts).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Feature extraction failed: {0}")]
    FeatureExtraction(String),

    #[error("Classification failed: {0}")]
    Classification(ClassificationError),

    #[error("Classifier timed out after {0} ms")]
    Timeout(u64),

    #[error("Redaction failed: {0}")]
    Redaction(#[from] RedactionError),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
            PipelineError::FeatureExtraction(_) => ErrorKind::FeatureExtraction,
            PipelineError::Classification(_) => ErrorKind::Classification,
            PipelineError::Timeout(_) => ErrorKind::Timeout,
            PipelineError::Redaction(_) => ErrorKind::Redaction,
            PipelineError::Export(_) => ErrorKind::Export,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Capacity(_) => ErrorKind::Capacity,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A classifier timeout is surfaced as its own kind so callers can tell a slow
/// model apart from a broken one.
impl From<ClassificationError> for PipelineError {
    fn from(err: ClassificationError) -> Self {
        match err {
            ClassificationError::Timeout(limit) => PipelineError::Timeout(limit.as_millis() as u64),
            other => PipelineError::Classification(other),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
