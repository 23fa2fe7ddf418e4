//! Core data model shared across the drover dispatch plane.

pub mod api;
pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod lease;
pub mod worker;

pub use error::ModelError;
pub use event::{EventType, JobEvent};
pub use ids::{JobId, WorkerId};
pub use job::{Job, JobStatus};
pub use lease::Lease;
pub use worker::WorkerRecord;

/// Milliseconds since the Unix epoch, from the local wall clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
