use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness plus a short view of the pipeline: loaded variants and job load.
///
/// `status` is `"degraded"` when no classifier variant could be loaded, since
/// every submission would then be rejected.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let service = &state.service;
    let jobs = service.store().summary();
    let ready_variants = service.registry().ready_count();

    let status = if ready_variants == 0 { "degraded" } else { "healthy" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
        },
        "models": {
            "ready_variants": ready_variants,
            "default_variant": service.default_variant(),
        },
        "jobs": load_status(&jobs),
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "requests_per_second": ratio(metrics.request_count, uptime_seconds),
        },
        "jobs": {
            "submitted": metrics.jobs_submitted,
            "rejected": metrics.jobs_rejected,
            "store": state.service.store().summary(),
        },
        "endpoints": endpoint_stats,
    }))
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

fn load_status(jobs: &crate::jobs::JobStoreSummary) -> serde_json::Value {
    let usage = if jobs.max_active_jobs > 0 {
        jobs.active_jobs as f64 / jobs.max_active_jobs as f64
    } else {
        0.0
    };

    let status = if usage >= 1.0 {
        "saturated"
    } else if usage > 0.7 {
        "busy"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "active_jobs": jobs.active_jobs,
        "max_active_jobs": jobs.max_active_jobs,
        "stored_jobs": jobs.total_jobs,
        "usage_percent": (usage * 100.0).round(),
    })
}
