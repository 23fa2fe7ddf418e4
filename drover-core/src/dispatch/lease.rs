//! Lease manager: hands jobs to polling workers, records results, and
//! requeues worker-reported failures.
//!
//! The queue pop is the serialization point between replicas; the lease
//! write is a write-if-absent compound transition inside the store, so
//! no two workers can ever hold the same job. URL signing happens
//! between the two — a signing failure fails the job instead of leaving
//! a half-assigned lease behind.

use super::Dispatcher;
use crate::blob;
use crate::error::CoreError;
use crate::store::{JobPatch, WorkerPatch};
use drover_model::api::{LeaseGrant, LeaseRequest, LeaseResponse, WorkerErrorRequest};
use drover_model::{EventType, Job, JobId, JobStatus, WorkerId, now_ms};
use serde_json::json;
use tracing::{info, warn};

/// Poll-again hint handed to workers whenever no lease is granted.
const WAIT_SEC: u64 = 2;

const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

impl Dispatcher {
    /// One worker poll. At most one job is granted per call, which keeps
    /// grants fair across a fleet of pollers.
    pub async fn lease(
        &self,
        req: &LeaseRequest,
        remote_ip: Option<String>,
    ) -> Result<LeaseResponse, CoreError> {
        let Ok(worker_id) = WorkerId::parse(&req.worker_id) else {
            warn!("lease poll with malformed worker id");
            return Ok(LeaseResponse::wait(WAIT_SEC));
        };
        let Some(worker) = self.store().get_worker(&worker_id).await? else {
            warn!(worker = %worker_id, "lease poll from unregistered worker");
            return Ok(LeaseResponse::wait(WAIT_SEC));
        };

        // The worker's own report of its active count is the truth.
        let patch = WorkerPatch {
            last_seen_ms: Some(now_ms()),
            active: Some(req.active),
            gpu: req.gpu.clone(),
            remote_ip,
        };
        self.store().patch_worker(&worker_id, &patch).await?;

        let free = worker.capacity.saturating_sub(req.active);
        let grant = req.wants.min(free).min(1);
        if grant == 0 {
            return Ok(LeaseResponse::wait(WAIT_SEC));
        }

        let Some(job_id) = self.store().pop_queue().await? else {
            return Ok(LeaseResponse::wait(WAIT_SEC));
        };

        let Some(job) = self.store().get_job(&job_id).await? else {
            warn!(job = %job_id, "queued id without a job record; dropping");
            return Ok(LeaseResponse::wait(WAIT_SEC));
        };
        if job.status.is_terminal() {
            // Canceled while queued and popped before the queue scrub.
            return Ok(LeaseResponse::wait(WAIT_SEC));
        }
        let Some(input_path) = job.input_path.clone() else {
            self.fail_job(&job.id, job.retries, "job record has no input artifact")
                .await?;
            return Ok(LeaseResponse::wait(WAIT_SEC));
        };

        let input_url = match self
            .blob()
            .sign_url(&input_path, self.config().input_url_ttl_sec)
        {
            Ok(url) => url,
            Err(e) => {
                warn!(job = %job_id, "input url signing failed: {e}");
                self.fail_job(&job.id, job.retries, "input url signing failed")
                    .await?;
                return Ok(LeaseResponse::wait(WAIT_SEC));
            }
        };

        let now = now_ms();
        let granted = self
            .store()
            .acquire_lease(
                &job_id,
                &worker_id,
                self.config().lease_timeout_sec,
                job.retries,
                now,
            )
            .await?;
        if !granted {
            warn!(job = %job_id, "lease already held; skipping grant");
            return Ok(LeaseResponse::wait(WAIT_SEC));
        }

        info!(job = %job_id, worker = %worker_id, "job leased");
        self.emit(
            &job_id,
            self.event(EventType::State, "processing").with_progress(40),
        )
        .await;

        Ok(LeaseResponse::granted(LeaseGrant {
            job_id,
            filename: job.filename,
            input_url,
            deadline_ts: now + (self.config().lease_timeout_sec as i64) * 1000,
            total_job_timeout_sec: self.config().total_job_timeout_sec,
            params: json!({}),
        }))
    }

    /// Worker uploads its output and reports completion. Completion is
    /// idempotent in effect: once the lease is gone and the job is
    /// terminal, any repeat report is rejected without mutating state.
    pub async fn submit_result(
        &self,
        worker_raw: &str,
        job_raw: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), CoreError> {
        let worker_id =
            WorkerId::parse(worker_raw).map_err(|_| CoreError::InvalidLease)?;
        let job_id = JobId::parse(job_raw).map_err(|_| CoreError::InvalidLease)?;
        let job = self
            .store()
            .get_job(&job_id)
            .await?
            .ok_or(CoreError::InvalidLease)?;
        self.validate_ownership(&job, &worker_id).await?;

        let output_path = blob::output_key(job_id.as_str());
        let upload = self
            .blob()
            .put(
                &output_path,
                bytes,
                content_type.unwrap_or(OUTPUT_CONTENT_TYPE),
            )
            .await;
        if let Err(e) = upload {
            warn!(job = %job_id, "output upload failed: {e}");
            self.decr_active(&worker_id).await;
            self.store().release_lease(&job_id).await?;
            let patch = JobPatch {
                status: Some(JobStatus::Failed),
                error: Some(Some("output upload failed".into())),
                finished_at_ms: Some(now_ms()),
                ..Default::default()
            };
            self.store().patch_job(&job_id, &patch).await?;
            self.emit(
                &job_id,
                self.event(EventType::Failed, "output upload failed"),
            )
            .await;
            return Err(e);
        }

        let finished = now_ms();
        let processing_ms = job.started_at_ms.map(|started| finished - started);
        let patch = JobPatch {
            status: Some(JobStatus::Completed),
            output_path: Some(output_path.clone()),
            finished_at_ms: Some(finished),
            processing_ms,
            ..Default::default()
        };
        self.store().patch_job(&job_id, &patch).await?;
        self.decr_active(&worker_id).await;
        self.store().release_lease(&job_id).await?;

        // Best effort: a signing hiccup must not lose the completion.
        let output_url = self
            .blob()
            .sign_url(&output_path, self.config().output_url_ttl_sec)
            .ok();
        let mut event = self
            .event(EventType::Completed, "completed")
            .with_progress(100);
        if let Some(url) = output_url {
            event = event.with_data(json!({ "output_url": url }));
        }
        info!(job = %job_id, worker = %worker_id, ?processing_ms, "job completed");
        self.emit(&job_id, event).await;
        Ok(())
    }

    /// Worker-reported failure: requeue with bounded retries, or fail
    /// the job once the budget is spent.
    pub async fn worker_error(&self, req: &WorkerErrorRequest) -> Result<(), CoreError> {
        let worker_id =
            WorkerId::parse(&req.worker_id).map_err(|_| CoreError::InvalidLease)?;
        let job_id = JobId::parse(&req.job_id).map_err(|_| CoreError::InvalidLease)?;

        self.decr_active(&worker_id).await;

        let lease = self.store().read_lease(&job_id).await?;
        self.store().release_lease(&job_id).await?;

        let Some(job) = self.store().get_job(&job_id).await? else {
            return Ok(());
        };
        if job.status.is_terminal() {
            // Canceled (or already resolved) while the worker ran.
            return Ok(());
        }

        // The lease carries the retry count; the job record mirrors it
        // for when the lease key has already expired.
        let prior = lease.map(|l| l.retries).unwrap_or(job.retries);
        self.requeue_or_fail(&job, prior, &req.error, "requeued after error")
            .await
    }

    /// Lease-or-processing ownership check shared by the result path.
    async fn validate_ownership(
        &self,
        job: &Job,
        worker_id: &WorkerId,
    ) -> Result<(), CoreError> {
        if let Some(lease) = self.store().read_lease(&job.id).await? {
            if lease.worker_id == *worker_id {
                return Ok(());
            }
            return Err(CoreError::InvalidLease);
        }
        // Lease may have expired a moment ago while the worker was
        // uploading; accept if the job record still names this worker.
        if job.status == JobStatus::Processing
            && job.worker_id.as_ref() == Some(worker_id)
        {
            return Ok(());
        }
        Err(CoreError::InvalidLease)
    }

    /// Shared by the worker-error path and the reaper. Bumps the retry
    /// counter, then either requeues (budget left) or fails the job with
    /// `fail_error`. The counter never decreases for a given id.
    pub(crate) async fn requeue_or_fail(
        &self,
        job: &Job,
        prior_retries: u32,
        fail_error: &str,
        requeue_msg: &str,
    ) -> Result<(), CoreError> {
        let bumped = prior_retries + 1;
        if bumped < self.config().max_retries {
            let patch = JobPatch {
                status: Some(JobStatus::Queued),
                retries: Some(bumped),
                error: Some(None),
                ..Default::default()
            };
            self.store().patch_job(&job.id, &patch).await?;
            self.store().push_queue(&job.id, job.priority).await?;
            info!(job = %job.id, retries = bumped, "{requeue_msg}");
            self.emit(&job.id, self.event(EventType::Info, requeue_msg))
                .await;
        } else {
            let patch = JobPatch {
                status: Some(JobStatus::Failed),
                retries: Some(bumped),
                error: Some(Some(fail_error.to_string())),
                finished_at_ms: Some(now_ms()),
                ..Default::default()
            };
            self.store().patch_job(&job.id, &patch).await?;
            warn!(job = %job.id, retries = bumped, "retry budget spent: {fail_error}");
            self.emit(&job.id, self.event(EventType::Failed, fail_error))
                .await;
        }
        Ok(())
    }

    /// Terminal failure outside the retry loop (broken record, signing).
    pub(crate) async fn fail_job(
        &self,
        job_id: &JobId,
        retries: u32,
        error: &str,
    ) -> Result<(), CoreError> {
        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            retries: Some(retries),
            error: Some(Some(error.to_string())),
            finished_at_ms: Some(now_ms()),
            ..Default::default()
        };
        self.store().patch_job(job_id, &patch).await?;
        self.emit(job_id, self.event(EventType::Failed, error)).await;
        Ok(())
    }

    async fn decr_active(&self, worker_id: &WorkerId) {
        match self.store().get_worker(worker_id).await {
            Ok(Some(_)) => {
                if let Err(e) = self.store().adjust_active(worker_id, -1).await {
                    warn!(worker = %worker_id, "active decrement failed: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(worker = %worker_id, "worker lookup failed: {e}"),
        }
    }
}
