//! # Classifier Variant Handlers
//!
//! Lists the classifier variants the upload form can pick from and whether
//! each one has a loaded model.

use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// ## Endpoint: `GET /api/v1/models`
///
/// ## Response:
/// ```json
/// {
///   "default_variant": "audio",
///   "ready_count": 1,
///   "variants": [
///     {
///       "variant": "audio",
///       "label": "Audio Model",
///       "is_default": true,
///       "status": "ready",
///       "extractor": "mfcc",
///       "classifier": "Audio Model",
///       "input_width": 15
///     },
///     {
///       "variant": "text",
///       "label": "Text Model",
///       "is_default": false,
///       "status": "unavailable",
///       "reason": "..."
///     }
///   ]
/// }
/// ```
pub async fn list_models(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let service = &state.service;
    let default_variant = service.default_variant();

    Ok(HttpResponse::Ok().json(json!({
        "default_variant": default_variant,
        "ready_count": service.registry().ready_count(),
        "variants": service.registry().summary(default_variant),
    })))
}
