//! # HTTP Error Handling
//!
//! `AppError` is what handlers return; actix turns it into a JSON response
//! through `ResponseError`. Pipeline failures arrive as `PipelineError` or as
//! a stored `FailureReason` and are mapped onto HTTP status codes here.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### From conversions
//! - `impl From<PipelineError> for AppError` lets handlers write
//!   `service.submit(..)?` and get the right status code for free
//!
//! ### ResponseError
//! - `status_code()` decides the HTTP status
//! - `error_response()` renders the shared JSON body
//!
//! ## Status Mapping:
//! - invalid upload / bad form data → 400
//! - unknown or already-collected job → 404
//! - job finished in `Failed` → 422, with the failure kind in the body
//! - too many jobs in flight → 503
//! - anything else → 500

use crate::pipeline::error::PipelineError;
use crate::pipeline::state::FailureReason;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors a handler can return.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("No file part".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Server-side failure (500)
    Internal(String),

    /// Malformed request, e.g. a multipart body without an `audio` field (400)
    BadRequest(String),

    /// Unknown, evicted or already-collected job (404)
    NotFound(String),

    /// Upload or parameter failed validation (400)
    ValidationError(String),

    /// The job ran and ended in `Failed` (422)
    JobFailed(FailureReason),

    /// The service cannot take more work right now (503)
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::JobFailed(reason) => write!(f, "Job failed: {}", reason),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ValidationError(_) => "validation_error",
            AppError::JobFailed(_) => "job_failed",
            AppError::Unavailable(_) => "service_unavailable",
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ValidationError(msg)
            | AppError::Unavailable(msg) => msg.clone(),
            AppError::JobFailed(reason) => reason.message.clone(),
        }
    }
}

/// JSON body for every error:
///
/// ```json
/// {
///   "error": {
///     "type": "job_failed",
///     "message": "Classifier timed out after 30000 ms",
///     "kind": "timeout",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
/// `kind` is only present for `job_failed`.
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::JobFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut error = json!({
            "type": self.error_type(),
            "message": self.message(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        if let AppError::JobFailed(reason) = self {
            error["kind"] = json!(reason.kind);
        }

        HttpResponse::build(self.status_code()).json(json!({ "error": error }))
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidInput(msg) => AppError::ValidationError(msg),
            PipelineError::NotFound(id) => AppError::NotFound(format!("Job '{}' not found", id)),
            PipelineError::Capacity(msg) => AppError::Unavailable(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorKind;

    #[test]
    fn test_pipeline_errors_map_to_status_codes() {
        let cases = [
            (PipelineError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (PipelineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (PipelineError::Capacity("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (PipelineError::Export("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_pipeline_failure_body_is_internal_error() {
        let err = AppError::from(PipelineError::Export("disk full".into()));
        assert_eq!(err.error_type(), "internal_error");
        assert!(err.message().contains("disk full"));
    }

    #[test]
    fn test_failed_job_is_unprocessable() {
        let err = AppError::JobFailed(FailureReason {
            kind: ErrorKind::Timeout,
            message: "too slow".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
