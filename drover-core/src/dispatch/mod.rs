//! The dispatcher: submission gateway, worker registry, lease manager,
//! event bus glue, and the reaper.
//!
//! Every method operates purely through the coordination store and blob
//! trait, so all replicas running the same configuration behave
//! identically. Blob I/O never happens inside a compound store
//! transition.

mod gateway;
mod lease;
mod reaper;
mod registry;

pub use gateway::{ArtifactKind, SubmitUpload};
pub use reaper::run_reaper;

use crate::blob::BlobStore;
use crate::error::CoreError;
use crate::store::CoordStore;
use drover_model::{EventType, JobEvent, JobId, now_ms};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Tuning knobs for the dispatch plane. Mirrors the deployment
/// environment one-to-one.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub lease_timeout_sec: u64,
    pub total_job_timeout_sec: u64,
    pub max_retries: u32,
    pub events_max: usize,
    pub p0_enabled: bool,
    pub priority_ips: HashSet<String>,
    pub heartbeat_stale_sec: u64,
    pub input_url_ttl_sec: u64,
    pub output_url_ttl_sec: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            lease_timeout_sec: 180,
            total_job_timeout_sec: 300,
            max_retries: 3,
            events_max: 200,
            p0_enabled: true,
            priority_ips: HashSet::new(),
            heartbeat_stale_sec: 30,
            input_url_ttl_sec: 3600,
            output_url_ttl_sec: 86_400,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn CoordStore>,
    blob: Arc<dyn BlobStore>,
    config: DispatchConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CoordStore>,
        blob: Arc<dyn BlobStore>,
        config: DispatchConfig,
    ) -> Self {
        Dispatcher { store, blob, config }
    }

    pub fn store(&self) -> &Arc<dyn CoordStore> {
        &self.store
    }

    pub fn blob(&self) -> &Arc<dyn BlobStore> {
        &self.blob
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Append an event to the job's bounded log and broadcast it. Event
    /// emission is never allowed to fail a state transition that already
    /// happened; failures are logged and swallowed.
    pub(crate) async fn emit(&self, job_id: &JobId, event: JobEvent) {
        if let Err(e) = self
            .store
            .append_event(job_id, &event, self.config.events_max)
            .await
        {
            warn!("event append failed for job {job_id}: {e}");
        }
    }

    pub(crate) fn event(&self, kind: EventType, message: impl Into<String>) -> JobEvent {
        JobEvent::new(now_ms(), kind, message)
    }

    /// Bounded event history, oldest first.
    pub async fn events(&self, job_id: &JobId) -> Result<Vec<JobEvent>, CoreError> {
        self.store.event_tail(job_id).await
    }

    /// Dedicated live subscription to one job's event channel.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> Result<crate::store::EventStream, CoreError> {
        self.store.subscribe_events(job_id).await
    }
}
