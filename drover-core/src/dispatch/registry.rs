//! Worker registry: registration, heartbeats, pool summaries.

use super::Dispatcher;
use crate::error::CoreError;
use crate::store::{JobIndex, WorkerPatch};
use drover_model::api::{PoolSummary, RegisterRequest, WaitTimeEstimate};
use drover_model::{JobStatus, WorkerId, WorkerRecord, now_ms};
use tracing::info;

/// How many recent jobs feed the wait-time estimate.
const WAIT_SAMPLE: usize = 100;

impl Dispatcher {
    /// Create a registry entry and hand back the id. The recommended
    /// heartbeat interval is half the staleness threshold, so one missed
    /// beat never flips a healthy worker offline.
    pub async fn register_worker(
        &self,
        req: RegisterRequest,
        remote_ip: Option<String>,
    ) -> Result<(WorkerId, u64), CoreError> {
        let id = WorkerId::generate();
        let now = now_ms();
        let worker = WorkerRecord {
            id: id.clone(),
            name: req.name.unwrap_or_else(|| format!("worker-{}", &id.as_str()[..8])),
            public_url: req.public_url,
            capacity: req.capacity.unwrap_or(1).max(1),
            active: 0,
            tags: req.tags,
            gpu: req.gpu,
            first_seen_ms: now,
            last_seen_ms: now,
            remote_ip,
        };
        self.store().put_worker(&worker).await?;
        info!(worker = %id, capacity = worker.capacity, "worker registered");
        Ok((id, self.heartbeat_interval_sec()))
    }

    pub fn heartbeat_interval_sec(&self) -> u64 {
        (self.config().heartbeat_stale_sec / 2).max(1)
    }

    /// Refresh `last_seen` and merge reported metrics.
    pub async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        metrics: Option<serde_json::Value>,
    ) -> Result<(), CoreError> {
        if self.store().get_worker(worker_id).await?.is_none() {
            return Err(CoreError::WorkerNotFound(worker_id.clone()));
        }
        let patch = WorkerPatch {
            last_seen_ms: Some(now_ms()),
            gpu: metrics,
            ..Default::default()
        };
        self.store().patch_worker(worker_id, &patch).await
    }

    pub async fn workers(&self) -> Result<Vec<WorkerRecord>, CoreError> {
        self.store().list_workers().await
    }

    /// Capacity over online workers plus queue depths. Stale workers are
    /// excluded from the sums but never deleted.
    pub async fn pool_summary(&self) -> Result<PoolSummary, CoreError> {
        let workers = self.store().list_workers().await?;
        let (p0, p1) = self.store().queue_depths().await?;
        let now = now_ms();
        let stale_sec = self.config().heartbeat_stale_sec;

        let mut online = 0usize;
        let mut capacity = 0u64;
        let mut active = 0u64;
        for worker in &workers {
            if worker.is_online(now, stale_sec) {
                online += 1;
                capacity += worker.capacity as u64;
                active += worker.active as u64;
            }
        }
        Ok(PoolSummary {
            workers_online: online,
            workers_total: workers.len(),
            capacity,
            active,
            queued_p0: p0,
            queued_p1: p1,
        })
    }

    /// Rough queue-wait estimate from recent completion times. `None`
    /// when there is no capacity or no history to extrapolate from.
    pub async fn wait_time(&self) -> Result<WaitTimeEstimate, CoreError> {
        let pool = self.pool_summary().await?;
        let queued = pool.queued_p0 + pool.queued_p1;

        let mut est = None;
        if pool.capacity > 0 {
            let ids = self.store().list_index(JobIndex::All, WAIT_SAMPLE).await?;
            let mut total_ms = 0i64;
            let mut samples = 0i64;
            for id in ids {
                if let Some(job) = self.store().get_job(&id).await?
                    && job.status == JobStatus::Completed
                    && let Some(ms) = job.processing_ms
                {
                    total_ms += ms;
                    samples += 1;
                }
            }
            if samples > 0 {
                let avg_ms = (total_ms / samples).max(0) as u64;
                est = Some(queued * avg_ms / pool.capacity / 1000);
            }
        }

        Ok(WaitTimeEstimate {
            queued,
            active: pool.active,
            capacity: pool.capacity,
            est_wait_sec: est,
        })
    }
}
