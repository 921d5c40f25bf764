//! # Job Store
//!
//! Owns every job record, keyed by a UUID v4 issued at submission. Each
//! submission gets its own record, filename and artifact slot, so concurrent
//! uploads can never read or overwrite each other's results.
//!
//! ## Locking:
//! - The id → record map sits behind one `RwLock`; it is only written on
//!   create, take and eviction
//! - Each record guards its own status/artifact with a separate `RwLock`, so
//!   a running job advancing its status never blocks other jobs
//! - Lock order is always map, then record
//!
//! ## Lifetime:
//! `Received → ... → Exported | Failed`, then the record stays until the
//! result is taken once or `retention` has passed since it finished.
//!
//! ## Capacity:
//! Every job holds a `JobSlot` from a semaphore of `max_active` permits. The
//! slot is cloned into each thread doing work for the job and frees only when
//! the last clone drops, so a job that failed on a timeout still counts while
//! its classifier thread is running.

use crate::classifier::ModelVariant;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::orchestrator::{JobArtifact, RedactionReport};
use crate::pipeline::state::{FailureReason, JobStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable part of a job.
#[derive(Debug)]
struct JobState {
    status: JobStatus,
    artifact: Option<Arc<JobArtifact>>,
    finished_at: Option<Instant>,
    finished_at_utc: Option<DateTime<Utc>>,
}

impl JobState {
    fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|finished| now.saturating_duration_since(finished) >= retention)
    }
}

/// One submitted job.
#[derive(Debug)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub input_filename: String,
    pub model_variant: ModelVariant,
    pub created_at: DateTime<Utc>,
    state: RwLock<JobState>,
}

impl JobRecord {
    fn new(job_id: Uuid, input_filename: String, model_variant: ModelVariant) -> Self {
        Self {
            job_id,
            input_filename,
            model_variant,
            created_at: Utc::now(),
            state: RwLock::new(JobState {
                status: JobStatus::Received,
                artifact: None,
                finished_at: None,
                finished_at_utc: None,
            }),
        }
    }

    pub fn status(&self) -> JobStatus {
        read(&self.state).status.clone()
    }

    fn snapshot(&self) -> JobSnapshot {
        let state = read(&self.state);
        JobSnapshot {
            job_id: self.job_id,
            input_filename: self.input_filename.clone(),
            model_variant: self.model_variant,
            status: state.status.clone(),
            created_at: self.created_at,
            finished_at: state.finished_at_utc,
            report: state.artifact.as_ref().map(|artifact| artifact.report.clone()),
        }
    }

    /// Move to `next` if the transition is legal; `artifact` is stored with it.
    fn transition(&self, next: JobStatus, artifact: Option<JobArtifact>) -> bool {
        let mut state = write(&self.state);
        if !state.status.can_advance_to(&next) {
            warn!(
                job_id = %self.job_id,
                from = state.status.as_str(),
                to = next.as_str(),
                "Rejected illegal job transition"
            );
            return false;
        }

        debug!(
            job_id = %self.job_id,
            from = state.status.as_str(),
            to = next.as_str(),
            "Job advanced"
        );
        if next.is_terminal() {
            state.finished_at = Some(Instant::now());
            state.finished_at_utc = Some(Utc::now());
        }
        state.status = next;
        if let Some(artifact) = artifact {
            state.artifact = Some(Arc::new(artifact));
        }
        true
    }
}

/// The pipeline's write access to exactly one job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    record: Arc<JobRecord>,
}

impl JobHandle {
    pub fn job_id(&self) -> Uuid {
        self.record.job_id
    }

    #[cfg(test)]
    pub fn status(&self) -> JobStatus {
        self.record.status()
    }

    /// Advance to the next pipeline stage. Returns `false` for illegal moves.
    pub fn advance(&self, next: JobStatus) -> bool {
        self.record.transition(next, None)
    }

    /// Store the artifact and mark the job `Exported`.
    pub fn complete(&self, artifact: JobArtifact) -> bool {
        let flagged = artifact.report.flagged_intervals_ms.len();
        let stored = self.record.transition(JobStatus::Exported, Some(artifact));
        if stored {
            info!(job_id = %self.job_id(), flagged_intervals = flagged, "Job exported");
        }
        stored
    }

    /// Mark the job `Failed` with the error's kind and message.
    pub fn fail(&self, err: &PipelineError) -> bool {
        let reason = FailureReason::from(err);
        let kind = reason.kind;
        let failed = self.record.transition(JobStatus::Failed(reason), None);
        if failed {
            warn!(job_id = %self.job_id(), kind = %kind, "Job failed: {}", err);
        }
        failed
    }
}

/// One of the store's `max_active` concurrency permits.
#[derive(Debug, Clone)]
pub struct JobSlot {
    _permit: Arc<OwnedSemaphorePermit>,
}

/// Serializable view of a job for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub input_filename: String,
    pub model_variant: ModelVariant,
    #[serde(flatten)]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<RedactionReport>,
}

/// Result of taking a job's output.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Ready(Arc<JobArtifact>),
    Pending(JobStatus),
    Failed(FailureReason),
}

/// Counts for health and metrics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct JobStoreSummary {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub max_active_jobs: usize,
    pub status_counts: HashMap<String, usize>,
}

pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Arc<JobRecord>>>,
    slots: Arc<Semaphore>,
    retention: Duration,
    max_active: usize,
}

impl JobStore {
    pub fn new(retention: Duration, max_active: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(max_active)),
            retention,
            max_active,
        }
    }

    /// Register a new job in `Received` and hand out its concurrency slot.
    ///
    /// ## Errors:
    /// `Capacity` when all `max_active` slots are still held.
    pub fn create(
        &self,
        input_filename: &str,
        model_variant: ModelVariant,
    ) -> PipelineResult<(JobHandle, JobSlot)> {
        let permit = Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
            PipelineError::Capacity(format!("Maximum concurrent jobs ({}) reached", self.max_active))
        })?;
        let slot = JobSlot {
            _permit: Arc::new(permit),
        };

        let mut jobs = write(&self.jobs);

        let mut job_id = Uuid::new_v4();
        while jobs.contains_key(&job_id) {
            job_id = Uuid::new_v4();
        }

        let record = Arc::new(JobRecord::new(job_id, input_filename.to_string(), model_variant));
        jobs.insert(job_id, Arc::clone(&record));
        info!(
            job_id = %job_id,
            filename = input_filename,
            variant = %model_variant,
            "Job received"
        );

        Ok((JobHandle { record }, slot))
    }

    /// Current state of a job. Expired results count as gone.
    pub fn snapshot(&self, job_id: &Uuid) -> PipelineResult<JobSnapshot> {
        let jobs = read(&self.jobs);
        let record = jobs
            .get(job_id)
            .filter(|record| !read(&record.state).is_expired(Instant::now(), self.retention))
            .ok_or_else(|| not_found(job_id))?;
        Ok(record.snapshot())
    }

    /// Take a finished job's result, removing the job.
    ///
    /// Running jobs are left in place and reported as `Pending`.
    pub fn take_result(&self, job_id: &Uuid) -> PipelineResult<JobOutcome> {
        let mut jobs = write(&self.jobs);
        let record = jobs.get(job_id).cloned().ok_or_else(|| not_found(job_id))?;

        let outcome = {
            let state = read(&record.state);
            if state.is_expired(Instant::now(), self.retention) {
                None
            } else {
                match (&state.status, &state.artifact) {
                    (JobStatus::Exported, Some(artifact)) => Some(JobOutcome::Ready(Arc::clone(artifact))),
                    (JobStatus::Failed(reason), _) => Some(JobOutcome::Failed(reason.clone())),
                    (status, _) => return Ok(JobOutcome::Pending(status.clone())),
                }
            }
        };

        jobs.remove(job_id);
        match outcome {
            Some(outcome) => {
                debug!(job_id = %job_id, "Job result taken");
                Ok(outcome)
            }
            None => Err(not_found(job_id)),
        }
    }

    /// Drop finished jobs whose retention has run out. Returns how many went.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut jobs = write(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, record| !read(&record.state).is_expired(now, self.retention));
        let evicted = before - jobs.len();
        if evicted > 0 {
            info!(evicted, remaining = jobs.len(), "Evicted expired job results");
        }
        evicted
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        read(&self.jobs).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> JobStoreSummary {
        let jobs = read(&self.jobs);
        let mut status_counts = HashMap::new();
        for record in jobs.values() {
            *status_counts.entry(record.status().as_str().to_string()).or_insert(0) += 1;
        }

        JobStoreSummary {
            total_jobs: jobs.len(),
            active_jobs: self.max_active - self.slots.available_permits(),
            max_active_jobs: self.max_active,
            status_counts,
        }
    }
}

fn not_found(job_id: &Uuid) -> PipelineError {
    PipelineError::NotFound(job_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorKind;

    fn artifact(tag: u8) -> JobArtifact {
        JobArtifact {
            wav: vec![tag; 8],
            report: RedactionReport {
                sample_rate: 8000,
                channels: 1,
                duration_ms: 0,
                window_count: 1,
                scored_windows: 1,
                unscored_windows: Vec::new(),
                flagged_windows: 0,
                flagged_intervals_ms: Vec::new(),
                processing_time_ms: 1,
            },
        }
    }

    fn run_to_redacted(handle: &JobHandle) {
        for status in [
            JobStatus::Decoded,
            JobStatus::Segmented,
            JobStatus::Featurized,
            JobStatus::Classified,
            JobStatus::Redacted,
        ] {
            assert!(handle.advance(status));
        }
    }

    #[test]
    fn test_each_job_gets_its_own_record() {
        let store = JobStore::new(Duration::from_secs(60), 8);
        let a = store.create("a.wav", ModelVariant::Audio).unwrap().0;
        let b = store.create("b.wav", ModelVariant::Text).unwrap().0;

        assert_ne!(a.job_id(), b.job_id());
        run_to_redacted(&a);
        run_to_redacted(&b);
        assert!(a.complete(artifact(1)));
        assert!(b.complete(artifact(2)));

        let JobOutcome::Ready(result_b) = store.take_result(&b.job_id()).unwrap() else {
            panic!("job b should be ready");
        };
        let JobOutcome::Ready(result_a) = store.take_result(&a.job_id()).unwrap() else {
            panic!("job a should be ready");
        };
        assert_eq!(result_a.wav, vec![1u8; 8]);
        assert_eq!(result_b.wav, vec![2u8; 8]);
    }

    #[test]
    fn test_result_can_only_be_taken_once() {
        let store = JobStore::new(Duration::from_secs(60), 8);
        let job = store.create("a.wav", ModelVariant::Audio).unwrap().0;
        run_to_redacted(&job);
        job.complete(artifact(1));

        assert!(matches!(store.take_result(&job.job_id()), Ok(JobOutcome::Ready(_))));
        assert!(matches!(
            store.take_result(&job.job_id()),
            Err(PipelineError::NotFound(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_running_job_is_pending_and_kept() {
        let store = JobStore::new(Duration::from_secs(60), 8);
        let job = store.create("a.wav", ModelVariant::Audio).unwrap().0;
        job.advance(JobStatus::Decoded);

        assert!(matches!(
            store.take_result(&job.job_id()),
            Ok(JobOutcome::Pending(JobStatus::Decoded))
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot(&job.job_id()).unwrap().status, JobStatus::Decoded);
    }

    #[test]
    fn test_failed_job_reports_reason() {
        let store = JobStore::new(Duration::from_secs(60), 8);
        let job = store.create("a.wav", ModelVariant::Audio).unwrap().0;
        job.advance(JobStatus::Decoded);
        assert!(job.fail(&PipelineError::Timeout(100)));

        // A failed job cannot be revived.
        assert!(!job.advance(JobStatus::Segmented));

        match store.take_result(&job.job_id()).unwrap() {
            JobOutcome::Failed(reason) => assert_eq!(reason.kind, ErrorKind::Timeout),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let store = JobStore::new(Duration::from_secs(60), 8);
        let job = store.create("a.wav", ModelVariant::Audio).unwrap().0;

        assert!(!job.advance(JobStatus::Classified));
        assert!(!job.complete(artifact(1)));
        assert_eq!(job.status(), JobStatus::Received);
    }

    #[test]
    fn test_capacity_is_held_until_every_slot_clone_drops() {
        let store = JobStore::new(Duration::from_secs(60), 1);
        let (first, slot) = store.create("a.wav", ModelVariant::Audio).unwrap();
        assert!(matches!(
            store.create("b.wav", ModelVariant::Audio),
            Err(PipelineError::Capacity(_))
        ));

        // A failed job whose classifier thread still runs keeps its slot.
        first.fail(&PipelineError::Timeout(20));
        let classifier_thread = slot.clone();
        drop(slot);
        assert!(matches!(
            store.create("b.wav", ModelVariant::Audio),
            Err(PipelineError::Capacity(_))
        ));
        assert_eq!(store.summary().active_jobs, 1);

        drop(classifier_thread);
        assert_eq!(store.summary().active_jobs, 0);
        let (_second, _slot) = store.create("b.wav", ModelVariant::Audio).unwrap();
        assert_eq!(store.summary().active_jobs, 1);
    }

    #[test]
    fn test_finished_results_expire() {
        let store = JobStore::new(Duration::from_secs(30), 8);
        let done = store.create("done.wav", ModelVariant::Audio).unwrap().0;
        let running = store.create("running.wav", ModelVariant::Audio).unwrap().0;
        run_to_redacted(&done);
        done.complete(artifact(1));

        assert_eq!(store.evict_expired(Instant::now()), 0);
        assert_eq!(store.evict_expired(Instant::now() + Duration::from_secs(31)), 1);
        assert!(matches!(
            store.snapshot(&done.job_id()),
            Err(PipelineError::NotFound(_))
        ));
        // Running jobs are never evicted.
        assert!(store.snapshot(&running.job_id()).is_ok());
    }

    #[test]
    fn test_expired_result_is_not_found_before_sweep() {
        let store = JobStore::new(Duration::ZERO, 8);
        let job = store.create("a.wav", ModelVariant::Audio).unwrap().0;
        run_to_redacted(&job);
        job.complete(artifact(1));

        assert!(matches!(
            store.take_result(&job.job_id()),
            Err(PipelineError::NotFound(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_serialization() {
        let store = JobStore::new(Duration::from_secs(60), 8);
        let job = store.create("call.mp3", ModelVariant::Text).unwrap().0;
        run_to_redacted(&job);
        job.complete(artifact(1));

        let json = serde_json::to_value(store.snapshot(&job.job_id()).unwrap()).unwrap();
        assert_eq!(json["state"], "exported");
        assert_eq!(json["model_variant"], "text");
        assert_eq!(json["input_filename"], "call.mp3");
        assert_eq!(json["report"]["window_count"], 1);
        assert!(json["finished_at"].is_string());

        let summary = store.summary();
        assert_eq!(summary.total_jobs, 1);
        assert_eq!(summary.active_jobs, 0);
        assert_eq!(summary.status_counts.get("exported"), Some(&1));
    }
}
