//! # Redaction Pipeline
//!
//! The job-level view of a redaction run: the error taxonomy, the status
//! state machine every job walks, and the orchestrator that drives one run.

pub mod error;
pub mod orchestrator;
pub mod state;

pub use error::ErrorKind;
pub use orchestrator::{AudioUpload, Orchestrator, PipelineSettings};
pub use state::JobStatus;
