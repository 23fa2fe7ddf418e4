//! Redis-backed coordination store.
//!
//! Compound transitions run as server-side Lua scripts so concurrent
//! replicas cannot interleave inside them; simple multi-key updates use
//! MULTI/EXEC pipelines. Lease expiry rides on key TTL, which keeps
//! expiry observable to every replica without clock synchronization.

use super::{CoordStore, EventStream, JobIndex, JobPatch, WorkerPatch};
use crate::error::CoreError;
use crate::keys;
use async_trait::async_trait;
use drover_model::{Job, JobEvent, JobId, JobStatus, Lease, WorkerId, WorkerRecord};
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tracing::debug;

/// Redis scripts for atomic compound transitions.
mod scripts {
    use redis::Script;

    /// Head of P0 if non-empty, else head of P1.
    pub fn pop_queue() -> Script {
        Script::new(
            r#"
            local id = redis.call('LPOP', KEYS[1])
            if not id then
                id = redis.call('LPOP', KEYS[2])
            end
            return id
            "#,
        )
    }

    /// Write-lease-if-absent plus the job/worker bookkeeping that must
    /// land with it. Returns 0 without touching anything when a live
    /// lease already exists.
    pub fn acquire_lease() -> Script {
        Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 1 then
                return 0
            end
            redis.call('HSET', KEYS[1],
                'worker_id', ARGV[1],
                'deadline_ts', ARGV[2],
                'retries', ARGV[3])
            redis.call('EXPIRE', KEYS[1], ARGV[4])
            redis.call('SADD', KEYS[2], ARGV[5])
            redis.call('HSET', KEYS[3],
                'status', 'processing',
                'started_at_ms', ARGV[6],
                'worker_id', ARGV[1],
                'retries', ARGV[3])
            redis.call('HINCRBY', KEYS[4], 'active', 1)
            return 1
            "#,
        )
    }

    /// HINCRBY clamped at zero.
    pub fn adjust_active() -> Script {
        Script::new(
            r#"
            local v = redis.call('HINCRBY', KEYS[1], 'active', ARGV[1])
            if v < 0 then
                redis.call('HSET', KEYS[1], 'active', 0)
                v = 0
            end
            return v
            "#,
        )
    }
}

pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    pop_queue: redis::Script,
    acquire_lease: redis::Script,
    adjust_active: redis::Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        debug!("connected coordination store at {url}");
        Ok(RedisStore {
            client,
            conn,
            pop_queue: scripts::pop_queue(),
            acquire_lease: scripts::acquire_lease(),
            adjust_active: scripts::adjust_active(),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn opt_field(map: &HashMap<String, String>, name: &str) -> Option<String> {
    map.get(name).filter(|v| !v.is_empty()).cloned()
}

fn req_field(map: &HashMap<String, String>, name: &str) -> Result<String, CoreError> {
    map.get(name)
        .cloned()
        .ok_or_else(|| CoreError::Store(format!("record missing field '{name}'")))
}

fn parse_num<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, CoreError> {
    raw.parse()
        .map_err(|_| CoreError::Store(format!("field '{name}' is not numeric: {raw}")))
}

fn opt_num<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, CoreError> {
    match opt_field(map, name) {
        Some(raw) => Ok(Some(parse_num(&raw, name)?)),
        None => Ok(None),
    }
}

fn job_field_pairs(job: &Job) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("id".into(), job.id.to_string()),
        ("status".into(), job.status.as_str().to_string()),
        ("filename".into(), job.filename.clone()),
        ("requester_ip".into(), job.requester_ip.clone()),
        ("user_agent".into(), job.user_agent.clone()),
        ("priority".into(), if job.priority { "1" } else { "0" }.into()),
        ("created_at_ms".into(), job.created_at_ms.to_string()),
        ("retries".into(), job.retries.to_string()),
    ];
    if let Some(v) = &job.input_path {
        pairs.push(("input_path".into(), v.clone()));
    }
    if let Some(v) = &job.output_path {
        pairs.push(("output_path".into(), v.clone()));
    }
    if let Some(v) = &job.client_id {
        pairs.push(("client_id".into(), v.clone()));
    }
    if let Some(v) = job.started_at_ms {
        pairs.push(("started_at_ms".into(), v.to_string()));
    }
    if let Some(v) = job.finished_at_ms {
        pairs.push(("finished_at_ms".into(), v.to_string()));
    }
    if let Some(v) = job.processing_ms {
        pairs.push(("processing_ms".into(), v.to_string()));
    }
    if let Some(v) = &job.worker_id {
        pairs.push(("worker_id".into(), v.to_string()));
    }
    if let Some(v) = &job.error {
        pairs.push(("error".into(), v.clone()));
    }
    pairs
}

fn job_from_map(map: HashMap<String, String>) -> Result<Job, CoreError> {
    let status: JobStatus = req_field(&map, "status")?.parse()?;
    let worker_id = match opt_field(&map, "worker_id") {
        Some(raw) => Some(WorkerId::parse(&raw)?),
        None => None,
    };
    Ok(Job {
        id: JobId::parse(&req_field(&map, "id")?)?,
        status,
        filename: req_field(&map, "filename")?,
        input_path: opt_field(&map, "input_path"),
        output_path: opt_field(&map, "output_path"),
        client_id: opt_field(&map, "client_id"),
        requester_ip: req_field(&map, "requester_ip")?,
        user_agent: map.get("user_agent").cloned().unwrap_or_default(),
        priority: map.get("priority").map(String::as_str) == Some("1"),
        created_at_ms: parse_num(&req_field(&map, "created_at_ms")?, "created_at_ms")?,
        started_at_ms: opt_num(&map, "started_at_ms")?,
        finished_at_ms: opt_num(&map, "finished_at_ms")?,
        processing_ms: opt_num(&map, "processing_ms")?,
        worker_id,
        retries: opt_num(&map, "retries")?.unwrap_or(0),
        error: opt_field(&map, "error"),
    })
}

fn worker_field_pairs(worker: &WorkerRecord) -> Result<Vec<(String, String)>, CoreError> {
    let mut pairs = vec![
        ("id".into(), worker.id.to_string()),
        ("name".into(), worker.name.clone()),
        ("capacity".into(), worker.capacity.to_string()),
        ("active".into(), worker.active.to_string()),
        ("first_seen_ms".into(), worker.first_seen_ms.to_string()),
        ("last_seen_ms".into(), worker.last_seen_ms.to_string()),
        ("tags".into(), serde_json::to_string(&worker.tags)?),
    ];
    if let Some(v) = &worker.public_url {
        pairs.push(("public_url".into(), v.clone()));
    }
    if let Some(v) = &worker.gpu {
        pairs.push(("gpu".into(), serde_json::to_string(v)?));
    }
    if let Some(v) = &worker.remote_ip {
        pairs.push(("remote_ip".into(), v.clone()));
    }
    Ok(pairs)
}

fn worker_from_map(map: HashMap<String, String>) -> Result<WorkerRecord, CoreError> {
    let tags = match opt_field(&map, "tags") {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Vec::new(),
    };
    let gpu = match opt_field(&map, "gpu") {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(WorkerRecord {
        id: WorkerId::parse(&req_field(&map, "id")?)?,
        name: map.get("name").cloned().unwrap_or_default(),
        public_url: opt_field(&map, "public_url"),
        capacity: opt_num(&map, "capacity")?.unwrap_or(1),
        active: opt_num(&map, "active")?.unwrap_or(0),
        tags,
        gpu,
        first_seen_ms: opt_num(&map, "first_seen_ms")?.unwrap_or(0),
        last_seen_ms: opt_num(&map, "last_seen_ms")?.unwrap_or(0),
        remote_ip: opt_field(&map, "remote_ip"),
    })
}

#[async_trait]
impl CoordStore for RedisStore {
    async fn ping(&self) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn put_job(&self, job: &Job) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .hset_multiple(keys::job(&job.id), &job_field_pairs(job))
            .await?;
        Ok(())
    }

    async fn patch_job(&self, id: &JobId, patch: &JobPatch) -> Result<(), CoreError> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(status) = patch.status {
            pairs.push(("status".into(), status.as_str().into()));
        }
        if let Some(v) = patch.started_at_ms {
            pairs.push(("started_at_ms".into(), v.to_string()));
        }
        if let Some(v) = patch.finished_at_ms {
            pairs.push(("finished_at_ms".into(), v.to_string()));
        }
        if let Some(v) = patch.processing_ms {
            pairs.push(("processing_ms".into(), v.to_string()));
        }
        if let Some(v) = &patch.output_path {
            pairs.push(("output_path".into(), v.clone()));
        }
        if let Some(v) = &patch.worker_id {
            pairs.push(("worker_id".into(), v.to_string()));
        }
        if let Some(v) = patch.retries {
            pairs.push(("retries".into(), v.to_string()));
        }
        if let Some(err) = &patch.error {
            // Empty string reads back as "no error".
            pairs.push(("error".into(), err.clone().unwrap_or_default()));
        }
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: () = conn.hset_multiple(keys::job(id), &pairs).await?;
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, CoreError> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(keys::job(id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        job_from_map(map).map(Some)
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let _: () = conn.del(keys::job(id)).await?;
        Ok(())
    }

    async fn index_job(
        &self,
        id: &JobId,
        client_id: Option<&str>,
        requester_ip: &str,
    ) -> Result<(), CoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lpush(keys::IDX_JOBS_ALL, id.as_str());
        if let Some(client) = client_id {
            pipe.lpush(keys::idx_client(client), id.as_str());
        }
        pipe.lpush(keys::idx_ip(requester_ip), id.as_str());
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn deindex_job(
        &self,
        id: &JobId,
        client_id: Option<&str>,
        requester_ip: &str,
    ) -> Result<(), CoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lrem(keys::IDX_JOBS_ALL, 0, id.as_str());
        if let Some(client) = client_id {
            pipe.lrem(keys::idx_client(client), 0, id.as_str());
        }
        pipe.lrem(keys::idx_ip(requester_ip), 0, id.as_str());
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn list_index(
        &self,
        index: JobIndex<'_>,
        limit: usize,
    ) -> Result<Vec<JobId>, CoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = match index {
            JobIndex::All => keys::IDX_JOBS_ALL.to_string(),
            JobIndex::Client(client) => keys::idx_client(client),
            JobIndex::RequesterIp(ip) => keys::idx_ip(ip),
        };
        let mut conn = self.conn();
        let raw: Vec<String> = conn.lrange(key, 0, limit as isize - 1).await?;
        raw.iter().map(|id| Ok(JobId::parse(id)?)).collect()
    }

    async fn push_queue(&self, id: &JobId, priority: bool) -> Result<(), CoreError> {
        let queue = if priority { keys::QUEUE_P0 } else { keys::QUEUE_P1 };
        let mut conn = self.conn();
        let _: () = conn.rpush(queue, id.as_str()).await?;
        Ok(())
    }

    async fn pop_queue(&self) -> Result<Option<JobId>, CoreError> {
        let mut conn = self.conn();
        let popped: Option<String> = self
            .pop_queue
            .key(keys::QUEUE_P0)
            .key(keys::QUEUE_P1)
            .invoke_async(&mut conn)
            .await?;
        match popped {
            Some(raw) => Ok(Some(JobId::parse(&raw)?)),
            None => Ok(None),
        }
    }

    async fn remove_from_queue(&self, id: &JobId) -> Result<(), CoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lrem(keys::QUEUE_P0, 0, id.as_str());
        pipe.lrem(keys::QUEUE_P1, 0, id.as_str());
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn queue_depths(&self) -> Result<(u64, u64), CoreError> {
        let mut conn = self.conn();
        let p0: u64 = conn.llen(keys::QUEUE_P0).await?;
        let p1: u64 = conn.llen(keys::QUEUE_P1).await?;
        Ok((p0, p1))
    }

    async fn acquire_lease(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        ttl_sec: u64,
        retries: u32,
        now_ms: i64,
    ) -> Result<bool, CoreError> {
        let deadline_ts = now_ms + (ttl_sec as i64) * 1000;
        let mut conn = self.conn();
        let granted: i64 = self
            .acquire_lease
            .key(keys::lease(job_id))
            .key(keys::LEASES_ACTIVE)
            .key(keys::job(job_id))
            .key(keys::worker(worker_id))
            .arg(worker_id.as_str())
            .arg(deadline_ts)
            .arg(retries)
            .arg(ttl_sec)
            .arg(job_id.as_str())
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(granted == 1)
    }

    async fn read_lease(&self, job_id: &JobId) -> Result<Option<Lease>, CoreError> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(keys::lease(job_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(Lease {
            job_id: job_id.clone(),
            worker_id: WorkerId::parse(&req_field(&map, "worker_id")?)?,
            deadline_ts: parse_num(&req_field(&map, "deadline_ts")?, "deadline_ts")?,
            retries: opt_num(&map, "retries")?.unwrap_or(0),
        }))
    }

    async fn release_lease(&self, job_id: &JobId) -> Result<(), CoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(keys::lease(job_id));
        pipe.srem(keys::LEASES_ACTIVE, job_id.as_str());
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn tracked_leases(&self) -> Result<Vec<JobId>, CoreError> {
        let mut conn = self.conn();
        let raw: Vec<String> = conn.smembers(keys::LEASES_ACTIVE).await?;
        raw.iter().map(|id| Ok(JobId::parse(id)?)).collect()
    }

    async fn untrack_lease(&self, job_id: &JobId) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let _: () = conn.srem(keys::LEASES_ACTIVE, job_id.as_str()).await?;
        Ok(())
    }

    async fn put_worker(&self, worker: &WorkerRecord) -> Result<(), CoreError> {
        let pairs = worker_field_pairs(worker)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(keys::worker(&worker.id), &pairs);
        pipe.sadd(keys::WORKERS_SET, worker.id.as_str());
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn patch_worker(
        &self,
        id: &WorkerId,
        patch: &WorkerPatch,
    ) -> Result<(), CoreError> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(v) = patch.last_seen_ms {
            pairs.push(("last_seen_ms".into(), v.to_string()));
        }
        if let Some(v) = patch.active {
            pairs.push(("active".into(), v.to_string()));
        }
        if let Some(v) = &patch.gpu {
            pairs.push(("gpu".into(), serde_json::to_string(v)?));
        }
        if let Some(v) = &patch.remote_ip {
            pairs.push(("remote_ip".into(), v.clone()));
        }
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: () = conn.hset_multiple(keys::worker(id), &pairs).await?;
        Ok(())
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerRecord>, CoreError> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(keys::worker(id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        worker_from_map(map).map(Some)
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, CoreError> {
        let mut conn = self.conn();
        let ids: Vec<String> = conn.smembers(keys::WORKERS_SET).await?;
        let mut workers = Vec::with_capacity(ids.len());
        for raw in ids {
            let id = WorkerId::parse(&raw)?;
            if let Some(worker) = self.get_worker(&id).await? {
                workers.push(worker);
            }
        }
        Ok(workers)
    }

    async fn adjust_active(&self, id: &WorkerId, delta: i64) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let _: i64 = self
            .adjust_active
            .key(keys::worker(id))
            .arg(delta)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn append_event(
        &self,
        job_id: &JobId,
        event: &JobEvent,
        max_len: usize,
    ) -> Result<(), CoreError> {
        let payload = serde_json::to_string(event)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lpush(keys::events(job_id), &payload);
        pipe.ltrim(keys::events(job_id), 0, max_len as isize - 1);
        pipe.publish(keys::event_channel(job_id), &payload);
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn event_tail(&self, job_id: &JobId) -> Result<Vec<JobEvent>, CoreError> {
        let mut conn = self.conn();
        let raw: Vec<String> = conn.lrange(keys::events(job_id), 0, -1).await?;
        // Stored newest first; return oldest first.
        raw.iter()
            .rev()
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    async fn delete_events(&self, job_id: &JobId) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let _: () = conn.del(keys::events(job_id)).await?;
        Ok(())
    }

    async fn subscribe_events(&self, job_id: &JobId) -> Result<EventStream, CoreError> {
        // Dedicated connection per subscription: SSE holds it for the
        // whole session and must not starve the shared manager.
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(keys::event_channel(job_id)).await?;
        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str::<JobEvent>(&payload).ok()
        });
        Ok(Box::pin(stream))
    }
}
