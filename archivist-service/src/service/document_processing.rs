//! Document ingestion pipeline.
//!
//! This module coordinates the document lifecycle:
//! - Upload and registration
//! - The processing state machine (PENDING → PROCESSING → COMPLETED/FAILED)
//! - The job queue, worker pool and retry policy
//! - Status events for subscribers
//! - Lookup, deletion and context retrieval

mod crud;
mod processing;
mod progress;
mod upload;
mod workers;

pub use processing::ProcessOutcome;
pub use upload::UploadScope;
pub use workers::{Job, RetryPolicy};
