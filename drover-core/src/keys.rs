//! Key layout in the coordination store.
//!
//! Every key is prefixed so one store instance can be shared with other
//! services. Hashes hold job/worker/lease records, lists hold the two
//! priority queues and the per-job event logs, a set tracks ids with an
//! outstanding lease, and per-job channels carry the live event feed.

use drover_model::{JobId, WorkerId};

pub const QUEUE_P0: &str = "drover:q:p0";
pub const QUEUE_P1: &str = "drover:q:p1";
pub const LEASES_ACTIVE: &str = "drover:leases:active";
pub const WORKERS_SET: &str = "drover:workers";
pub const IDX_JOBS_ALL: &str = "drover:idx:jobs:all";

pub fn job(id: &JobId) -> String {
    format!("drover:job:{id}")
}

pub fn lease(id: &JobId) -> String {
    format!("drover:lease:{id}")
}

pub fn worker(id: &WorkerId) -> String {
    format!("drover:worker:{id}")
}

pub fn events(id: &JobId) -> String {
    format!("drover:events:{id}")
}

pub fn event_channel(id: &JobId) -> String {
    format!("drover:events:chan:{id}")
}

pub fn idx_client(client_id: &str) -> String {
    format!("drover:idx:jobs:client:{client_id}")
}

pub fn idx_ip(ip: &str) -> String {
    format!("drover:idx:jobs:ip:{ip}")
}
