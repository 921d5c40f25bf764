//! # Jobs
//!
//! Per-request job records and the service that runs them.
//!
//! - **store**: job id → record map with status, artifact and retention
//! - **service**: submission, status, result retrieval, eviction sweep

pub mod service;
pub mod store;

pub use service::{spawn_eviction_sweep, RedactionService};
pub use store::{JobOutcome, JobStore, JobStoreSummary};
