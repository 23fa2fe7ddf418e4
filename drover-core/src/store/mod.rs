//! Coordination-store abstraction.
//!
//! One interface, two backends: Redis for multi-replica deployments and
//! an in-memory store for tests and single-node development. Compound
//! transitions are atomic inside each backend — server-side scripts on
//! Redis, a single mutex-held section in memory.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::CoreError;
use async_trait::async_trait;
use drover_model::{Job, JobEvent, JobId, JobStatus, Lease, WorkerId, WorkerRecord};
use futures::Stream;
use std::pin::Pin;

/// Live feed of one job's events, owned exclusively by its subscriber.
/// Dropping the stream releases the underlying subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = JobEvent> + Send>>;

/// Which listing index to read.
#[derive(Debug, Clone, Copy)]
pub enum JobIndex<'a> {
    All,
    Client(&'a str),
    RequesterIp(&'a str),
}

/// Field-level update to a job record. `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub processing_ms: Option<i64>,
    pub output_path: Option<String>,
    pub worker_id: Option<WorkerId>,
    pub retries: Option<u32>,
    /// `Some(None)` clears the error, `Some(Some(_))` sets it.
    pub error: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        JobPatch {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Field-level update to a worker record.
#[derive(Debug, Clone, Default)]
pub struct WorkerPatch {
    pub last_seen_ms: Option<i64>,
    pub active: Option<u32>,
    pub gpu: Option<serde_json::Value>,
    pub remote_ip: Option<String>,
}

/// The persistence interface the dispatcher runs against.
#[async_trait]
pub trait CoordStore: Send + Sync {
    async fn ping(&self) -> Result<(), CoreError>;

    // Jobs
    async fn put_job(&self, job: &Job) -> Result<(), CoreError>;
    async fn patch_job(&self, id: &JobId, patch: &JobPatch) -> Result<(), CoreError>;
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, CoreError>;
    async fn delete_job(&self, id: &JobId) -> Result<(), CoreError>;

    // Listing indexes (newest first)
    async fn index_job(
        &self,
        id: &JobId,
        client_id: Option<&str>,
        requester_ip: &str,
    ) -> Result<(), CoreError>;
    async fn deindex_job(
        &self,
        id: &JobId,
        client_id: Option<&str>,
        requester_ip: &str,
    ) -> Result<(), CoreError>;
    async fn list_index(
        &self,
        index: JobIndex<'_>,
        limit: usize,
    ) -> Result<Vec<JobId>, CoreError>;

    // Priority queue
    async fn push_queue(&self, id: &JobId, priority: bool) -> Result<(), CoreError>;
    /// Pop P0's head if present, else P1's. Atomic across both lists.
    async fn pop_queue(&self) -> Result<Option<JobId>, CoreError>;
    /// Remove every occurrence of `id` from both queues. Idempotent.
    async fn remove_from_queue(&self, id: &JobId) -> Result<(), CoreError>;
    async fn queue_depths(&self) -> Result<(u64, u64), CoreError>;

    // Leases
    /// Write a lease for `job_id` only if none exists, mark the job
    /// `processing`, bump the worker's active count, and track the id —
    /// all in one atomic transition. Returns false when a live lease was
    /// already present (nothing is changed in that case).
    async fn acquire_lease(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        ttl_sec: u64,
        retries: u32,
        now_ms: i64,
    ) -> Result<bool, CoreError>;
    async fn read_lease(&self, job_id: &JobId) -> Result<Option<Lease>, CoreError>;
    /// Delete the lease key and drop the id from the tracking set.
    async fn release_lease(&self, job_id: &JobId) -> Result<(), CoreError>;
    async fn tracked_leases(&self) -> Result<Vec<JobId>, CoreError>;
    async fn untrack_lease(&self, job_id: &JobId) -> Result<(), CoreError>;

    // Worker registry
    async fn put_worker(&self, worker: &WorkerRecord) -> Result<(), CoreError>;
    async fn patch_worker(
        &self,
        id: &WorkerId,
        patch: &WorkerPatch,
    ) -> Result<(), CoreError>;
    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerRecord>, CoreError>;
    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, CoreError>;
    /// Adjust the worker's active count by `delta`, clamped at zero.
    async fn adjust_active(&self, id: &WorkerId, delta: i64) -> Result<(), CoreError>;

    // Event log & bus
    /// Append to the bounded per-job log (trimming to `max_len`) and
    /// publish the same payload on the job's channel, as one operation.
    async fn append_event(
        &self,
        job_id: &JobId,
        event: &JobEvent,
        max_len: usize,
    ) -> Result<(), CoreError>;
    /// The bounded log, oldest first.
    async fn event_tail(&self, job_id: &JobId) -> Result<Vec<JobEvent>, CoreError>;
    async fn delete_events(&self, job_id: &JobId) -> Result<(), CoreError>;
    /// Open a dedicated subscription to the job's channel. Only events
    /// published after this call resolves are delivered.
    async fn subscribe_events(&self, job_id: &JobId) -> Result<EventStream, CoreError>;
}
