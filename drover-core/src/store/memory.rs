//! In-memory coordination store.
//!
//! Backs tests and single-node development deployments. One mutex over
//! the whole state is the single-replica analogue of Redis's serialized
//! script execution: every compound transition happens under the lock.
//! Lease "TTL" is a deadline checked lazily on read, so expiry behaves
//! like a vanished key, exactly as the Redis backend observes it.

use super::{CoordStore, EventStream, JobIndex, JobPatch, WorkerPatch};
use crate::error::CoreError;
use async_trait::async_trait;
use drover_model::{Job, JobEvent, JobId, Lease, WorkerId, WorkerRecord, now_ms};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::{Mutex, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<JobId, Job>,
    p0: VecDeque<JobId>,
    p1: VecDeque<JobId>,
    leases: HashMap<JobId, Lease>,
    tracked: HashSet<JobId>,
    workers: HashMap<WorkerId, WorkerRecord>,
    events: HashMap<JobId, VecDeque<JobEvent>>,
    channels: HashMap<JobId, broadcast::Sender<JobEvent>>,
    idx_all: Vec<JobId>,
    idx_client: HashMap<String, Vec<JobId>>,
    idx_ip: HashMap<String, Vec<JobId>>,
}

impl MemoryInner {
    /// A lease whose deadline passed behaves like an expired Redis key.
    fn live_lease(&mut self, job_id: &JobId) -> Option<Lease> {
        let lease = self.leases.get(job_id)?;
        if lease.deadline_ts <= now_ms() {
            self.leases.remove(job_id);
            return None;
        }
        Some(lease.clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordStore for MemoryStore {
    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn put_job(&self, job: &Job) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn patch_job(&self, id: &JobId, patch: &JobPatch) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(());
        };
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(v) = patch.started_at_ms {
            job.started_at_ms = Some(v);
        }
        if let Some(v) = patch.finished_at_ms {
            job.finished_at_ms = Some(v);
        }
        if let Some(v) = patch.processing_ms {
            job.processing_ms = Some(v);
        }
        if let Some(v) = &patch.output_path {
            job.output_path = Some(v.clone());
        }
        if let Some(v) = &patch.worker_id {
            job.worker_id = Some(v.clone());
        }
        if let Some(v) = patch.retries {
            job.retries = v;
        }
        if let Some(err) = &patch.error {
            job.error = err.clone().filter(|text| !text.is_empty());
        }
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(id).cloned())
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.jobs.remove(id);
        Ok(())
    }

    async fn index_job(
        &self,
        id: &JobId,
        client_id: Option<&str>,
        requester_ip: &str,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.idx_all.insert(0, id.clone());
        if let Some(client) = client_id {
            inner
                .idx_client
                .entry(client.to_string())
                .or_default()
                .insert(0, id.clone());
        }
        inner
            .idx_ip
            .entry(requester_ip.to_string())
            .or_default()
            .insert(0, id.clone());
        Ok(())
    }

    async fn deindex_job(
        &self,
        id: &JobId,
        client_id: Option<&str>,
        requester_ip: &str,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.idx_all.retain(|entry| entry != id);
        if let Some(client) = client_id
            && let Some(list) = inner.idx_client.get_mut(client)
        {
            list.retain(|entry| entry != id);
        }
        if let Some(list) = inner.idx_ip.get_mut(requester_ip) {
            list.retain(|entry| entry != id);
        }
        Ok(())
    }

    async fn list_index(
        &self,
        index: JobIndex<'_>,
        limit: usize,
    ) -> Result<Vec<JobId>, CoreError> {
        let inner = self.inner.lock().await;
        let ids = match index {
            JobIndex::All => Some(&inner.idx_all),
            JobIndex::Client(client) => inner.idx_client.get(client),
            JobIndex::RequesterIp(ip) => inner.idx_ip.get(ip),
        };
        Ok(ids
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn push_queue(&self, id: &JobId, priority: bool) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if priority {
            inner.p0.push_back(id.clone());
        } else {
            inner.p1.push_back(id.clone());
        }
        Ok(())
    }

    async fn pop_queue(&self) -> Result<Option<JobId>, CoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.p0.pop_front().or_else(|| inner.p1.pop_front()))
    }

    async fn remove_from_queue(&self, id: &JobId) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.p0.retain(|entry| entry != id);
        inner.p1.retain(|entry| entry != id);
        Ok(())
    }

    async fn queue_depths(&self) -> Result<(u64, u64), CoreError> {
        let inner = self.inner.lock().await;
        Ok((inner.p0.len() as u64, inner.p1.len() as u64))
    }

    async fn acquire_lease(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        ttl_sec: u64,
        retries: u32,
        now_ms: i64,
    ) -> Result<bool, CoreError> {
        let mut inner = self.inner.lock().await;
        if inner.live_lease(job_id).is_some() {
            return Ok(false);
        }
        let deadline_ts = now_ms + (ttl_sec as i64) * 1000;
        inner.leases.insert(
            job_id.clone(),
            Lease {
                job_id: job_id.clone(),
                worker_id: worker_id.clone(),
                deadline_ts,
                retries,
            },
        );
        inner.tracked.insert(job_id.clone());
        if let Some(job) = inner.jobs.get_mut(job_id) {
            job.status = drover_model::JobStatus::Processing;
            job.started_at_ms = Some(now_ms);
            job.worker_id = Some(worker_id.clone());
            job.retries = retries;
        }
        if let Some(worker) = inner.workers.get_mut(worker_id) {
            worker.active += 1;
        }
        Ok(true)
    }

    async fn read_lease(&self, job_id: &JobId) -> Result<Option<Lease>, CoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_lease(job_id))
    }

    async fn release_lease(&self, job_id: &JobId) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.leases.remove(job_id);
        inner.tracked.remove(job_id);
        Ok(())
    }

    async fn tracked_leases(&self) -> Result<Vec<JobId>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.tracked.iter().cloned().collect())
    }

    async fn untrack_lease(&self, job_id: &JobId) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.tracked.remove(job_id);
        Ok(())
    }

    async fn put_worker(&self, worker: &WorkerRecord) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.workers.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn patch_worker(
        &self,
        id: &WorkerId,
        patch: &WorkerPatch,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        let Some(worker) = inner.workers.get_mut(id) else {
            return Ok(());
        };
        if let Some(v) = patch.last_seen_ms {
            worker.last_seen_ms = v;
        }
        if let Some(v) = patch.active {
            worker.active = v;
        }
        if let Some(v) = &patch.gpu {
            worker.gpu = Some(v.clone());
        }
        if let Some(v) = &patch.remote_ip {
            worker.remote_ip = Some(v.clone());
        }
        Ok(())
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerRecord>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.workers.get(id).cloned())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.workers.values().cloned().collect())
    }

    async fn adjust_active(&self, id: &WorkerId, delta: i64) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(worker) = inner.workers.get_mut(id) {
            let next = worker.active as i64 + delta;
            worker.active = next.max(0) as u32;
        }
        Ok(())
    }

    async fn append_event(
        &self,
        job_id: &JobId,
        event: &JobEvent,
        max_len: usize,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        let log = inner.events.entry(job_id.clone()).or_default();
        log.push_front(event.clone());
        log.truncate(max_len);
        if let Some(sender) = inner.channels.get(job_id) {
            // No live subscriber is fine; pub/sub has no backlog.
            let _ = sender.send(event.clone());
        }
        Ok(())
    }

    async fn event_tail(&self, job_id: &JobId) -> Result<Vec<JobEvent>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .get(job_id)
            .map(|log| log.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_events(&self, job_id: &JobId) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.events.remove(job_id);
        Ok(())
    }

    async fn subscribe_events(&self, job_id: &JobId) -> Result<EventStream, CoreError> {
        let mut inner = self.inner.lock().await;
        let sender = inner
            .channels
            .entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        let receiver = sender.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_model::{EventType, JobStatus};

    fn queued_job(priority: bool) -> Job {
        let id = JobId::generate();
        Job::new_queued(
            id.clone(),
            "cat.jpg".into(),
            format!("jobs/{id}/input/cat.jpg"),
            None,
            "9.9.9.9".into(),
            "test-agent".into(),
            priority,
            now_ms(),
        )
    }

    #[tokio::test]
    async fn p0_drains_before_p1() {
        let store = MemoryStore::new();
        let normal = queued_job(false);
        let urgent = queued_job(true);
        store.push_queue(&normal.id, false).await.unwrap();
        store.push_queue(&urgent.id, true).await.unwrap();

        assert_eq!(store.pop_queue().await.unwrap(), Some(urgent.id));
        assert_eq!(store.pop_queue().await.unwrap(), Some(normal.id));
        assert_eq!(store.pop_queue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn acquire_lease_is_exclusive() {
        let store = MemoryStore::new();
        let job = queued_job(false);
        store.put_job(&job).await.unwrap();
        let a = WorkerId::generate();
        let b = WorkerId::generate();

        assert!(store.acquire_lease(&job.id, &a, 60, 0, now_ms()).await.unwrap());
        assert!(!store.acquire_lease(&job.id, &b, 60, 0, now_ms()).await.unwrap());

        let lease = store.read_lease(&job.id).await.unwrap().unwrap();
        assert_eq!(lease.worker_id, a);
        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn expired_lease_reads_as_absent_but_stays_tracked() {
        let store = MemoryStore::new();
        let job = queued_job(false);
        store.put_job(&job).await.unwrap();
        let worker = WorkerId::generate();
        assert!(store.acquire_lease(&job.id, &worker, 0, 0, now_ms()).await.unwrap());

        assert!(store.read_lease(&job.id).await.unwrap().is_none());
        assert_eq!(store.tracked_leases().await.unwrap(), vec![job.id.clone()]);
    }

    #[tokio::test]
    async fn event_log_is_trimmed() {
        let store = MemoryStore::new();
        let job = queued_job(false);
        for n in 0..10 {
            let ev = JobEvent::new(n, EventType::Info, format!("event {n}"));
            store.append_event(&job.id, &ev, 4).await.unwrap();
        }
        let tail = store.event_tail(&job.id).await.unwrap();
        assert_eq!(tail.len(), 4);
        // Oldest-first ordering of the newest four entries.
        assert_eq!(tail.first().unwrap().message, "event 6");
        assert_eq!(tail.last().unwrap().message, "event 9");
    }

    #[tokio::test]
    async fn subscriber_sees_only_later_events() {
        let store = MemoryStore::new();
        let job = queued_job(false);
        let before = JobEvent::new(1, EventType::Info, "before");
        store.append_event(&job.id, &before, 200).await.unwrap();

        let mut stream = store.subscribe_events(&job.id).await.unwrap();
        let after = JobEvent::new(2, EventType::State, "after");
        store.append_event(&job.id, &after, 200).await.unwrap();

        let received = stream.next().await.unwrap();
        assert_eq!(received.message, "after");
    }
}
