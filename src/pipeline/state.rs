//! # Job State Machine
//!
//! Every job walks the same one-directional path:
//!
//! ```text
//! Received → Decoded → Segmented → Featurized → Classified → Redacted → Exported
//!     └──────────┴──────────┴───────────┴────────────┴───────────┴──→ Failed(reason)
//! ```
//!
//! - `Exported` is terminal success, `Failed` is terminal failure.
//! - No stage may be skipped and nothing moves backwards.
//! - Any non-terminal state may move to `Failed`.

use crate::pipeline::error::{ErrorKind, PipelineError};
use serde::Serialize;

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReason {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for FailureReason {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Current position of a job in the pipeline.
///
/// ## Serialization:
/// Rendered as `{"state": "classified"}` or
/// `{"state": "failed", "kind": "timeout", "message": "..."}` in API responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Received,
    Decoded,
    Segmented,
    Featurized,
    Classified,
    Redacted,
    Exported,
    Failed(FailureReason),
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Received => "received",
            JobStatus::Decoded => "decoded",
            JobStatus::Segmented => "segmented",
            JobStatus::Featurized => "featurized",
            JobStatus::Classified => "classified",
            JobStatus::Redacted => "redacted",
            JobStatus::Exported => "exported",
            JobStatus::Failed(_) => "failed",
        }
    }

    /// Position along the success path; `None` for `Failed`.
    fn stage(&self) -> Option<u8> {
        match self {
            JobStatus::Received => Some(0),
            JobStatus::Decoded => Some(1),
            JobStatus::Segmented => Some(2),
            JobStatus::Featurized => Some(3),
            JobStatus::Classified => Some(4),
            JobStatus::Redacted => Some(5),
            JobStatus::Exported => Some(6),
            JobStatus::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Exported | JobStatus::Failed(_))
    }

    /// Whether `next` is a legal transition from `self`.
    pub fn can_advance_to(&self, next: &JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.stage(), next.stage()) {
            (_, None) => true,
            (Some(current), Some(target)) => target == current + 1,
            (None, Some(_)) => false,
        }
    }
}
