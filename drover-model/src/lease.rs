use crate::ids::{JobId, WorkerId};
use serde::{Deserialize, Serialize};

/// Short-TTL record granting one worker exclusive right to run one job.
///
/// The store-level TTL on the lease key is what makes expiry observable to
/// every replica; `deadline_ts` is the same instant as wall-clock
/// milliseconds, carried for workers and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub deadline_ts: i64,
    pub retries: u32,
}
