//! # Audio Redactor - Main Application Entry Point
//!
//! HTTP service that silences flagged stretches of uploaded audio.
//!
//! ## Request flow:
//! 1. An upload arrives at `POST /api/v1/jobs` (or the legacy `POST /process-audio`)
//! 2. The redaction service creates a job and runs the pipeline on tokio's
//!    blocking pool: decode → window → MFCC → classify → merge and silence → WAV
//! 3. Clients poll the job and download the WAV once; finished jobs that are
//!    never collected are evicted after the retention period
//!
//! ## Application Architecture:
//! - **audio**: decoding, windowing and WAV export
//! - **features**: per-window MFCC extraction
//! - **classifier**: the classifier trait, the candle model and the variant registry
//! - **redaction**: merging flagged windows into intervals and silencing them
//! - **pipeline**: the orchestrator, job states and pipeline errors
//! - **jobs**: the job store and the service handlers talk to
//! - **config / state / error / health / middleware / handlers**: the HTTP service

mod audio;
mod classifier;
mod config;
mod device;
mod error;
mod features;
mod handlers;
mod health;
mod jobs;
mod middleware;
mod pipeline;
mod redaction;
mod state;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use classifier::ModelRegistry;
use config::AppConfig;
use features::{FeatureExtractor, MfccConfig, MfccExtractor};
use jobs::{spawn_eviction_sweep, JobStore, RedactionService};
use pipeline::{Orchestrator, PipelineSettings};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting audio-redactor v{}", env!("CARGO_PKG_VERSION"));
    info!(
        segment_ms = config.pipeline.segment_duration_ms,
        features = config.pipeline.feature_dimensionality,
        timeout_ms = config.pipeline.classifier_timeout_ms,
        "Pipeline configured"
    );

    let service = Arc::new(build_service(&config)?);
    if service.registry().ready_count() == 0 {
        warn!("No classifier variant loaded; every submission will be rejected");
    }

    let sweep = spawn_eviction_sweep(Arc::clone(service.store()), config.jobs.cleanup_interval());

    let app_state = AppState::new(config.clone(), service);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    sweep.abort();
    info!("Server stopped gracefully");
    Ok(())
}

/// Wire extractor, classifiers, store and orchestrator into the service.
fn build_service(config: &AppConfig) -> Result<RedactionService> {
    let extractor: Arc<dyn FeatureExtractor> = Arc::new(MfccExtractor::new(
        MfccConfig::with_coefficients(config.pipeline.feature_dimensionality),
    )?);

    let registry = ModelRegistry::load_from_config(&config.models, &config.pipeline, extractor);
    let store = JobStore::new(config.jobs.result_retention(), config.jobs.max_concurrent_jobs);
    let orchestrator = Orchestrator::new(PipelineSettings::from(&config.pipeline));

    Ok(RedactionService::new(
        Arc::new(store),
        Arc::new(orchestrator),
        Arc::new(registry),
        config.models.default_variant,
    ))
}

/// `RUST_LOG` wins; otherwise debug for this crate, info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_redactor=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
