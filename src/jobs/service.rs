//! # Redaction Service
//!
//! The entry point HTTP handlers talk to: submit an upload, poll its status,
//! take its result. Submission creates the job record and hands the pipeline
//! run to tokio's blocking pool, so request threads never run DSP or inference.

use crate::classifier::{ModelRegistry, ModelVariant};
use crate::jobs::store::{JobHandle, JobOutcome, JobSnapshot, JobStore};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::orchestrator::{AudioUpload, Orchestrator};
use crate::pipeline::state::JobStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span};
use uuid::Uuid;

/// How often `wait_for_completion` re-checks a job.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RedactionService {
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<ModelRegistry>,
    default_variant: ModelVariant,
}

impl RedactionService {
    pub fn new(
        store: Arc<JobStore>,
        orchestrator: Arc<Orchestrator>,
        registry: Arc<ModelRegistry>,
        default_variant: ModelVariant,
    ) -> Self {
        Self {
            store,
            orchestrator,
            registry,
            default_variant,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn default_variant(&self) -> ModelVariant {
        self.default_variant
    }

    /// Create a job for `upload` and start it in the background.
    ///
    /// Must be called from inside a tokio runtime.
    ///
    /// ## Errors:
    /// - `InvalidInput` when the chosen variant has no loaded model
    /// - `Capacity` when too many jobs are already running
    pub fn submit(&self, upload: AudioUpload, variant: Option<ModelVariant>) -> PipelineResult<Uuid> {
        let variant = variant.unwrap_or(self.default_variant);
        let binding = self.registry.binding(variant)?;
        let (handle, slot) = self.store.create(&upload.filename, variant)?;
        let job_id = handle.job_id();

        let orchestrator = Arc::clone(&self.orchestrator);
        let worker_handle = handle.clone();
        let worker: JoinHandle<()> = tokio::task::spawn_blocking(move || {
            let span = info_span!("job", job_id = %worker_handle.job_id(), variant = %variant);
            let _entered = span.enter();

            info!(
                filename = %upload.filename,
                bytes = upload.bytes.len(),
                "Pipeline started"
            );
            let result = orchestrator.run(&upload, &binding, slot.clone(), |status| {
                worker_handle.advance(status);
            });
            match result {
                Ok(artifact) => {
                    if !worker_handle.complete(artifact) {
                        worker_handle.fail(&PipelineError::Internal(
                            "pipeline finished out of order".to_string(),
                        ));
                    }
                }
                Err(e) => {
                    worker_handle.fail(&e);
                }
            }
            drop(slot);
        });

        tokio::spawn(watch_worker(handle, worker));
        Ok(job_id)
    }

    /// Status of a job without consuming its result.
    pub fn status(&self, job_id: &Uuid) -> PipelineResult<JobSnapshot> {
        self.store.snapshot(job_id)
    }

    /// Take a job's result; finished jobs are removed from the store.
    pub fn get_result(&self, job_id: &Uuid) -> PipelineResult<JobOutcome> {
        self.store.take_result(job_id)
    }

    /// Wait until the job is terminal or `timeout` passes, then return its status.
    pub async fn wait_for_completion(&self, job_id: &Uuid, timeout: Duration) -> PipelineResult<JobStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.store.snapshot(job_id)?.status;
            if status.is_terminal() || Instant::now() >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Fail the job if its worker panicked before reaching a terminal state.
async fn watch_worker(handle: JobHandle, worker: JoinHandle<()>) {
    if let Err(e) = worker.await {
        error!(job_id = %handle.job_id(), "Pipeline worker aborted: {}", e);
        handle.fail(&PipelineError::Internal(format!("pipeline worker aborted: {}", e)));
    }
}

/// Periodically evict expired results from `store`.
pub fn spawn_eviction_sweep(store: Arc<JobStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            store.evict_expired(Instant::now());
        }
    })
}
