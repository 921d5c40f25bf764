use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration after defaults, `config.toml` and environment.
///
/// ## Endpoint: `GET /api/v1/config`
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = &state.config;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": config.server,
            "pipeline": config.pipeline,
            "models": config.models,
            "jobs": config.jobs,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::FlagWindows;
    use crate::config::AppConfig;
    use crate::jobs::service::tests::service_with;
    use actix_web::{test, App};
    use std::sync::Arc;
    use std::time::Duration;

    #[actix_web::test]
    async fn test_config_reports_pipeline_settings() {
        let service = service_with(Arc::new(FlagWindows::new(15, &[])), Duration::from_secs(1), 1);
        let state = AppState::new(AppConfig::default(), Arc::new(service));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["pipeline"]["segment_duration_ms"], 500);
        assert_eq!(body["config"]["models"]["default_variant"], "audio");
        assert_eq!(body["config"]["jobs"]["max_concurrent_jobs"], 8);
    }
}
