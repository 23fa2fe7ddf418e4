use crate::ids::WorkerId;
use serde::{Deserialize, Serialize};

/// Registry entry for one GPU worker.
///
/// Records are never auto-deleted; stale entries stay around for
/// diagnostics and are only filtered out of capacity summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub capacity: u32,
    pub active: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<serde_json::Value>,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
}

impl WorkerRecord {
    pub fn is_online(&self, now_ms: i64, stale_sec: u64) -> bool {
        now_ms - self.last_seen_ms < (stale_sec as i64) * 1000
    }

    /// Free slots, saturating at zero when the worker over-reports.
    pub fn free_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WorkerId;

    fn worker(active: u32, capacity: u32, last_seen_ms: i64) -> WorkerRecord {
        WorkerRecord {
            id: WorkerId::generate(),
            name: "gpu-0".to_string(),
            public_url: None,
            capacity,
            active,
            tags: Vec::new(),
            gpu: None,
            first_seen_ms: 0,
            last_seen_ms,
            remote_ip: None,
        }
    }

    #[test]
    fn staleness_threshold() {
        let w = worker(0, 1, 1_000);
        assert!(w.is_online(30_999, 30));
        assert!(!w.is_online(31_000, 30));
    }

    #[test]
    fn free_slots_saturate() {
        assert_eq!(worker(3, 2, 0).free_slots(), 0);
        assert_eq!(worker(1, 4, 0).free_slots(), 3);
    }
}
