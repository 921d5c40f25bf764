//! # Redaction Job Handlers
//!
//! HTTP surface of the redaction service. Uploads become jobs; jobs are
//! polled by id and their WAV output is collected exactly once.
//!
//! ## Available Endpoints:
//! - `POST /api/v1/jobs` - Upload audio, start a job, return `202`
//! - `GET /api/v1/jobs/{job_id}` - Job status and report
//! - `GET /api/v1/jobs/{job_id}/audio` - Download the redacted WAV (removes the job)
//! - `POST /process-audio` - Upload and wait; answers with a `/static/...` link
//! - `GET /static/{job_id}.wav` - Download produced by `/process-audio`
//!
//! ## Form Fields:
//! - `audio`: the file, `.wav` or `.mp3`
//! - `model`: optional, `"Audio Model"` / `"Text Model"` (or `audio` / `text`)

use crate::classifier::ModelVariant;
use crate::error::{AppError, AppResult};
use crate::jobs::JobOutcome;
use crate::pipeline::{AudioUpload, ErrorKind, JobStatus};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{http::StatusCode, web, HttpResponse};
use futures_util::stream::StreamExt;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Extra time `/process-audio` waits on top of the classifier timeout, to
/// cover decoding, feature extraction and export.
const LEGACY_WAIT_MARGIN: Duration = Duration::from_secs(30);

/// Parsed multipart upload form.
#[derive(Debug, Default)]
struct UploadForm {
    filename: Option<String>,
    audio: Option<Vec<u8>>,
    model: Option<String>,
}

impl UploadForm {
    /// Read every field of the form, refusing audio larger than `max_bytes`.
    async fn read(mut payload: Multipart, max_bytes: usize) -> AppResult<Self> {
        let mut form = UploadForm::default();

        while let Some(item) = payload.next().await {
            let mut field: Field =
                item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

            let content_disposition = field
                .content_disposition()
                .ok_or_else(|| AppError::BadRequest("Missing content disposition".to_string()))?;
            let field_name = content_disposition
                .get_name()
                .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?
                .to_string();

            match field_name.as_str() {
                "audio" => {
                    form.filename = content_disposition.get_filename().map(|s| s.to_string());
                    form.audio = Some(read_field(&mut field, max_bytes).await?);
                }
                "model" => {
                    let raw = read_field(&mut field, 256).await?;
                    let value = String::from_utf8_lossy(&raw).trim().to_string();
                    form.model = (!value.is_empty()).then_some(value);
                }
                other => {
                    debug!(field = other, "Ignoring unknown form field");
                    read_field(&mut field, max_bytes).await?;
                }
            }
        }

        Ok(form)
    }

    /// Turn the form into a validated upload and the requested variant.
    fn into_upload(self, max_bytes: usize) -> AppResult<(AudioUpload, Option<ModelVariant>)> {
        let bytes = self
            .audio
            .ok_or_else(|| AppError::BadRequest("No audio file received".to_string()))?;
        let filename = self.filename.unwrap_or_default();
        let variant = self
            .model
            .map(|m| m.parse::<ModelVariant>())
            .transpose()
            .map_err(AppError::ValidationError)?;

        let upload = AudioUpload::new(filename, bytes, max_bytes)?;
        Ok((upload, variant))
    }
}

async fn read_field(field: &mut Field, max_bytes: usize) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > max_bytes {
            return Err(AppError::ValidationError(format!(
                "Upload exceeds the limit of {} bytes",
                max_bytes
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Unparseable ids are reported the same way as unknown ones.
fn parse_job_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(format!("Job '{}' not found", raw)))
}

/// Read the form and submit it, counting the attempt either way.
async fn submit_form(state: &AppState, payload: Multipart) -> AppResult<(Uuid, ModelVariant)> {
    let max_bytes = state.config.server.max_upload_bytes;
    let result = async {
        let (upload, variant) = UploadForm::read(payload, max_bytes).await?.into_upload(max_bytes)?;
        let variant = variant.unwrap_or_else(|| state.service.default_variant());
        let job_id = state.service.submit(upload, Some(variant))?;
        Ok::<_, AppError>((job_id, variant))
    }
    .await;

    state.record_job_submission(result.is_ok());
    result
}

/// Response for a job's output: the WAV, `202` while running, or the failure.
fn artifact_response(job_id: Uuid, outcome: JobOutcome) -> AppResult<HttpResponse> {
    match outcome {
        JobOutcome::Ready(artifact) => Ok(HttpResponse::Ok()
            .content_type("audio/wav")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"{}.wav\"", job_id),
            ))
            .body(artifact.wav.clone())),
        JobOutcome::Pending(status) => Ok(HttpResponse::build(StatusCode::ACCEPTED).json(json!({
            "job_id": job_id,
            "status": status,
            "status_url": format!("/api/v1/jobs/{}", job_id),
        }))),
        JobOutcome::Failed(reason) => Err(AppError::JobFailed(reason)),
    }
}

/// Upload audio and start a redaction job.
///
/// ## Endpoint: `POST /api/v1/jobs`
///
/// ## Response (`202 Accepted`):
/// ```json
/// {
///   "job_id": "6f1c...",
///   "model_variant": "audio",
///   "status": { "state": "received" },
///   "status_url": "/api/v1/jobs/6f1c...",
///   "download_url": "/api/v1/jobs/6f1c.../audio"
/// }
/// ```
pub async fn submit_job(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let (job_id, variant) = submit_form(&state, payload).await?;
    info!(job_id = %job_id, variant = %variant, "Job accepted");

    Ok(HttpResponse::build(StatusCode::ACCEPTED).json(json!({
        "job_id": job_id,
        "model_variant": variant,
        "status": JobStatus::Received,
        "status_url": format!("/api/v1/jobs/{}", job_id),
        "download_url": format!("/api/v1/jobs/{}/audio", job_id),
    })))
}

/// ## Endpoint: `GET /api/v1/jobs/{job_id}`
pub async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let job_id = parse_job_id(&path)?;
    let snapshot = state.service.status(&job_id)?;
    Ok(HttpResponse::Ok().json(snapshot))
}

/// Download a finished job's WAV. The job is removed once this returns the
/// file or its failure.
///
/// ## Endpoint: `GET /api/v1/jobs/{job_id}/audio`
pub async fn download_job_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let job_id = parse_job_id(&path)?;
    let outcome = state.service.get_result(&job_id)?;
    artifact_response(job_id, outcome)
}

/// Synchronous upload for the browser client: submit, wait, link.
///
/// ## Endpoint: `POST /process-audio`
///
/// ## Response:
/// - `200` `{"processed_audio": "/static/<job_id>.wav"}` once exported
/// - `202` with the job id when the job is still running after the wait
/// - `400` when the upload could not be decoded, `422` for other failures
pub async fn process_audio_legacy(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let (job_id, _) = submit_form(&state, payload).await?;
    let wait = state.config.pipeline.classifier_timeout() + LEGACY_WAIT_MARGIN;

    match state.service.wait_for_completion(&job_id, wait).await? {
        JobStatus::Exported => Ok(HttpResponse::Ok().json(json!({
            "processed_audio": format!("/static/{}.wav", job_id),
        }))),
        JobStatus::Failed(reason) => {
            state.service.get_result(&job_id)?;
            if reason.kind == ErrorKind::InvalidInput {
                Err(AppError::ValidationError(reason.message))
            } else {
                Err(AppError::JobFailed(reason))
            }
        }
        status => Ok(HttpResponse::build(StatusCode::ACCEPTED).json(json!({
            "job_id": job_id,
            "status": status,
            "status_url": format!("/api/v1/jobs/{}", job_id),
        }))),
    }
}

/// ## Endpoint: `GET /static/{job_id}.wav`
pub async fn serve_static_artifact(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let name = path.into_inner();
    let stem = name
        .strip_suffix(".wav")
        .ok_or_else(|| AppError::NotFound(format!("File '{}' not found", name)))?;
    let job_id = parse_job_id(stem)?;
    let outcome = state.service.get_result(&job_id)?;
    artifact_response(job_id, outcome)
}
