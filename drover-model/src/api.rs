//! Wire DTOs shared between the dispatcher core and the HTTP surface.

use crate::ids::{JobId, WorkerId};
use crate::job::Job;
use serde::{Deserialize, Serialize};

/// Response body for an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitAccepted {
    pub id: JobId,
    pub status: &'static str,
    pub position: u64,
    pub priority: bool,
}

/// Worker self-description at registration time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub public_url: Option<String>,
    pub capacity: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub gpu: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: WorkerId,
    pub lease_endpoint: String,
    pub result_endpoint: String,
    pub error_endpoint: String,
    pub heartbeat_interval_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub metrics: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: String,
    #[serde(default)]
    pub wants: u32,
    #[serde(default)]
    pub active: u32,
    pub gpu: Option<serde_json::Value>,
}

/// A granted lease, as handed to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub job_id: JobId,
    pub filename: String,
    pub input_url: String,
    pub deadline_ts: i64,
    pub total_job_timeout_sec: u64,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseResponse {
    pub lease: Option<LeaseGrant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_sec: Option<u64>,
}

impl LeaseResponse {
    pub fn granted(grant: LeaseGrant) -> Self {
        LeaseResponse {
            lease: Some(grant),
            wait_sec: None,
        }
    }

    pub fn wait(wait_sec: u64) -> Self {
        LeaseResponse {
            lease: None,
            wait_sec: Some(wait_sec),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerErrorRequest {
    pub worker_id: String,
    pub job_id: String,
    pub error: String,
}

/// Capacity summary over online workers plus queue depths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummary {
    pub workers_online: usize,
    pub workers_total: usize,
    pub capacity: u64,
    pub active: u64,
    pub queued_p0: u64,
    pub queued_p1: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitTimeEstimate {
    pub queued: u64,
    pub active: u64,
    pub capacity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub est_wait_sec: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobsPage {
    pub items: Vec<Job>,
    pub count: usize,
}
