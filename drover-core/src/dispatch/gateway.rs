//! Submission gateway and admin job operations.

use super::Dispatcher;
use crate::blob;
use crate::error::CoreError;
use crate::sanitize::sanitize_filename;
use crate::store::{JobIndex, JobPatch};
use drover_model::api::SubmitAccepted;
use drover_model::{EventType, Job, JobId, JobStatus, now_ms};
use serde_json::json;
use tracing::{info, warn};

/// How many ids the listing endpoints scan before filtering. Listing is
/// an ops surface; older jobs are reachable by id.
const LIST_SCAN_CAP: usize = 1000;

/// One client upload, already read off the wire.
#[derive(Debug, Clone)]
pub struct SubmitUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
    pub client_id: Option<String>,
    pub requester_ip: String,
    pub user_agent: String,
}

/// Which artifact of a job a signed URL should point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Input,
    Output,
}

impl ArtifactKind {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "input" => Ok(ArtifactKind::Input),
            "output" => Ok(ArtifactKind::Output),
            other => Err(CoreError::InvalidRequest(format!(
                "unknown artifact kind '{other}'"
            ))),
        }
    }
}

impl Dispatcher {
    /// Persist the upload, create the job record, index it, and enqueue.
    ///
    /// Pipeline order matters: blob first, then record, then indexes,
    /// then the queue push. A failure anywhere leaves no leasable job
    /// behind.
    pub async fn submit(&self, upload: SubmitUpload) -> Result<SubmitAccepted, CoreError> {
        let id = JobId::generate();
        let safe_name = sanitize_filename(&upload.filename);
        let input_path = blob::input_key(id.as_str(), &safe_name);

        self.blob()
            .put(&input_path, &upload.bytes, &upload.content_type)
            .await?;

        let priority = self.config().p0_enabled
            && self.config().priority_ips.contains(&upload.requester_ip);

        let (p0, p1) = self.store().queue_depths().await?;
        let pool = self.pool_summary().await?;
        let position = p0 + p1 + pool.active + 1;

        let job = Job::new_queued(
            id.clone(),
            safe_name,
            input_path,
            upload.client_id.clone(),
            upload.requester_ip.clone(),
            upload.user_agent,
            priority,
            now_ms(),
        );
        self.store().put_job(&job).await?;
        self.store()
            .index_job(&id, upload.client_id.as_deref(), &upload.requester_ip)
            .await?;
        self.store().push_queue(&id, priority).await?;

        info!(job = %id, priority, position, "job queued");
        self.emit(
            &id,
            self.event(
                EventType::Info,
                format!("queued at position {position}"),
            )
            .with_data(json!({
                "position": position,
                "capacity": pool.capacity,
                "priority": priority,
            })),
        )
        .await;

        Ok(SubmitAccepted {
            id,
            status: "queued",
            position,
            priority,
        })
    }

    pub async fn job(&self, id: &JobId) -> Result<Job, CoreError> {
        self.store()
            .get_job(id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(id.clone()))
    }

    /// Admin listing with optional status and free-text filters.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        query: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Job>, CoreError> {
        let ids = self.store().list_index(JobIndex::All, LIST_SCAN_CAP).await?;
        let needle = query.map(str::to_lowercase);
        let mut matched = Vec::new();
        for id in ids {
            let Some(job) = self.store().get_job(&id).await? else {
                continue;
            };
            if let Some(wanted) = status
                && job.status != wanted
            {
                continue;
            }
            if let Some(needle) = &needle
                && !job_matches(&job, needle)
            {
                continue;
            }
            matched.push(job);
        }
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// Jobs submitted under one client id, newest first.
    pub async fn jobs_for_client(
        &self,
        client_id: &str,
        limit: usize,
    ) -> Result<Vec<Job>, CoreError> {
        let ids = self
            .store()
            .list_index(JobIndex::Client(client_id), limit)
            .await?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.store().get_job(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Remove from both queues and mark canceled. Idempotent: canceling
    /// a terminal job confirms its state without touching it.
    pub async fn cancel_job(&self, id: &JobId) -> Result<Job, CoreError> {
        let job = self.job(id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        self.store().remove_from_queue(id).await?;
        self.store().release_lease(id).await?;
        let patch = JobPatch {
            status: Some(JobStatus::Canceled),
            finished_at_ms: Some(now_ms()),
            ..Default::default()
        };
        self.store().patch_job(id, &patch).await?;
        self.emit(id, self.event(EventType::Canceled, "canceled by admin"))
            .await;
        self.job(id).await
    }

    /// Clone the input into a brand new job id and queue it. Terminal
    /// states are absorbing, so retry never reuses the old id.
    pub async fn retry_job(&self, id: &JobId) -> Result<JobId, CoreError> {
        let job = self.job(id).await?;
        let Some(input_path) = &job.input_path else {
            return Err(CoreError::InvalidRequest(
                "job has no input to retry".into(),
            ));
        };

        let new_id = JobId::generate();
        let new_input = blob::input_key(new_id.as_str(), &job.filename);
        self.blob().copy(input_path, &new_input).await?;

        let clone = Job::new_queued(
            new_id.clone(),
            job.filename.clone(),
            new_input,
            job.client_id.clone(),
            job.requester_ip.clone(),
            job.user_agent.clone(),
            job.priority,
            now_ms(),
        );
        self.store().put_job(&clone).await?;
        self.store()
            .index_job(&new_id, job.client_id.as_deref(), &job.requester_ip)
            .await?;
        self.store().push_queue(&new_id, job.priority).await?;

        info!(from = %id, job = %new_id, "job cloned for retry");
        self.emit(
            &new_id,
            self.event(
                EventType::Info,
                format!("queued as retry of {id}"),
            ),
        )
        .await;
        Ok(new_id)
    }

    /// Delete the record, queue entries, lease, events, and (best
    /// effort) blobs.
    pub async fn delete_job(&self, id: &JobId) -> Result<(), CoreError> {
        let job = self.job(id).await?;

        self.store().remove_from_queue(id).await?;
        self.store().release_lease(id).await?;
        self.store().delete_events(id).await?;
        self.store()
            .deindex_job(id, job.client_id.as_deref(), &job.requester_ip)
            .await?;
        self.store().delete_job(id).await?;

        if let Err(e) = self
            .blob()
            .delete_prefix(&blob::job_prefix(id.as_str()))
            .await
        {
            warn!("blob cleanup failed for job {id}: {e}");
        }
        Ok(())
    }

    /// Signed read URL for a job artifact.
    pub async fn artifact_url(
        &self,
        id: &JobId,
        kind: ArtifactKind,
    ) -> Result<String, CoreError> {
        let job = self.job(id).await?;
        let (path, ttl) = match kind {
            ArtifactKind::Input => {
                (job.input_path, self.config().input_url_ttl_sec)
            }
            ArtifactKind::Output => {
                (job.output_path, self.config().output_url_ttl_sec)
            }
        };
        let Some(path) = path else {
            return Err(CoreError::InvalidRequest(
                "job has no such artifact".into(),
            ));
        };
        self.blob().sign_url(&path, ttl)
    }

    /// Artifact URL gated on client ownership, for the `/my` surface.
    pub async fn artifact_url_for_client(
        &self,
        id: &JobId,
        kind: ArtifactKind,
        client_id: &str,
    ) -> Result<String, CoreError> {
        let job = self.job(id).await?;
        if job.client_id.as_deref() != Some(client_id) {
            return Err(CoreError::JobNotFound(id.clone()));
        }
        self.artifact_url(id, kind).await
    }
}

fn job_matches(job: &Job, needle: &str) -> bool {
    job.id.as_str().contains(needle)
        || job.filename.to_lowercase().contains(needle)
        || job
            .client_id
            .as_deref()
            .is_some_and(|c| c.to_lowercase().contains(needle))
        || job.requester_ip.contains(needle)
        || job
            .worker_id
            .as_ref()
            .is_some_and(|w| w.as_str().contains(needle))
}
