pub mod config;
pub mod jobs;
pub mod models;

pub use config::*;
pub use jobs::*;
pub use models::*;

use crate::health;
use actix_web::web;

/// Register every route of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config))
            .route("/models", web::get().to(list_models))
            .route("/jobs", web::post().to(submit_job))
            .route("/jobs/{job_id}", web::get().to(job_status))
            .route("/jobs/{job_id}/audio", web::get().to(download_job_audio)),
    )
    .route("/health", web::get().to(health::health_check))
    .route("/process-audio", web::post().to(process_audio_legacy))
    .route("/static/{filename}", web::get().to(serve_static_artifact));
}
