//! Reaper: recovers jobs whose lease TTL elapsed without a result.
//!
//! Expiry is observed purely through the store (the lease key is gone
//! but the id is still tracked), so any replica's reaper can recover any
//! job without clock coordination or a lock.

use super::Dispatcher;
use crate::error::CoreError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

impl Dispatcher {
    /// One sweep over the lease-tracking set. Returns how many expired
    /// leases were recovered (requeued or failed).
    pub async fn sweep_expired_leases(&self) -> Result<usize, CoreError> {
        let mut recovered = 0;
        for job_id in self.store().tracked_leases().await? {
            let Some(job) = self.store().get_job(&job_id).await? else {
                self.store().untrack_lease(&job_id).await?;
                continue;
            };
            if job.status.is_terminal() {
                self.store().untrack_lease(&job_id).await?;
                continue;
            }
            if self.store().read_lease(&job_id).await?.is_some() {
                continue;
            }

            // Lease key gone, job still in flight: the worker died.
            // The job-record retry mirror is authoritative now.
            self.requeue_or_fail(
                &job,
                job.retries,
                "lease expired",
                "lease expired; requeued",
            )
            .await?;
            self.store().untrack_lease(&job_id).await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}

/// Background sweep loop with a fixed period.
pub fn run_reaper(dispatcher: Arc<Dispatcher>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match dispatcher.sweep_expired_leases().await {
                Ok(0) => {}
                Ok(n) => info!("reaper recovered {n} expired lease(s)"),
                Err(e) => warn!("lease sweep failed: {e}"),
            }
        }
    })
}
