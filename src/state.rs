//! # Application State
//!
//! Shared state handed to every actix handler through `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Every worker thread of the HTTP server holds a clone of `AppState`
//! - Cloning an `Arc` only bumps a counter; the data itself is shared
//!
//! ### RwLock for counters
//! - Request metrics are written by middleware on every request and read by
//!   `/api/v1/metrics`, so they sit behind a `RwLock`
//! - The configuration never changes after startup and needs no lock
//!
//! ### What lives where
//! - `config`: the effective configuration, read-only
//! - `metrics`: request counters per endpoint
//! - `service`: the redaction service, which owns the job store

use crate::config::AppConfig;
use crate::jobs::RedactionService;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub service: Arc<RedactionService>,
    pub start_time: Instant,
}

/// Request and job counters since startup.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub jobs_submitted: u64,
    pub jobs_rejected: u64,
    /// Keyed by `"METHOD /route/{template}"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, service: Arc<RedactionService>) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            service,
            start_time: Instant::now(),
        }
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Count a submission attempt; `accepted` is false when it was refused.
    pub fn record_job_submission(&self, accepted: bool) {
        self.with_metrics(|m| {
            if accepted {
                m.jobs_submitted += 1;
            } else {
                m.jobs_rejected += 1;
            }
        });
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            metric.request_count += 1;
            metric.total_duration_ms += duration_ms;
            if is_error {
                metric.error_count += 1;
            }
        });
    }

    /// Copy of the counters, taken under the read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Share of failed requests, `0.0..=1.0`.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
