//! Liveness and diagnostics surface.

use axum::{Json, extract::State};
use drover_model::api::{PoolSummary, WaitTimeEstimate};
use drover_model::now_ms;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::AppState;
use crate::errors::AppResult;

/// Window of recent jobs summarized by `/metrics`.
const METRICS_SAMPLE: usize = 200;

pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "status": "alive" }))
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "pong": true, "ts": now_ms() }))
}

pub async fn gpu_status(State(state): State<AppState>) -> AppResult<Json<PoolSummary>> {
    Ok(Json(state.dispatcher.pool_summary().await?))
}

pub async fn wait_time(
    State(state): State<AppState>,
) -> AppResult<Json<WaitTimeEstimate>> {
    Ok(Json(state.dispatcher.wait_time().await?))
}

/// Queue depths, pool capacity, and a status breakdown over recent jobs.
pub async fn metrics(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let pool = state.dispatcher.pool_summary().await?;
    let recent = state
        .dispatcher
        .list_jobs(None, None, 0, METRICS_SAMPLE)
        .await?;

    let mut by_status: HashMap<&'static str, u64> = HashMap::new();
    for job in &recent {
        *by_status.entry(job.status.as_str()).or_default() += 1;
    }

    Ok(Json(json!({
        "pool": pool,
        "recent_jobs": recent.len(),
        "recent_by_status": by_status,
    })))
}
