//! Worker protocol: register, heartbeat, lease, result, error.

use axum::{
    Json,
    extract::{Multipart, State},
    http::HeaderMap,
};
use drover_model::api::{
    HeartbeatRequest, LeaseRequest, LeaseResponse, RegisterRequest,
    RegisterResponse, WorkerErrorRequest,
};
use drover_model::{WorkerId, now_ms};
use serde_json::{Value, json};
use tracing::warn;

use crate::AppState;
use crate::auth::middleware::client_ip;
use crate::errors::{AppError, AppResult};

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    let remote_ip = Some(client_ip(&headers, None));
    let (worker_id, heartbeat_interval_sec) =
        state.dispatcher.register_worker(request, remote_ip).await?;

    Ok(Json(RegisterResponse {
        worker_id,
        lease_endpoint: "/api/worker/lease".to_string(),
        result_endpoint: "/api/worker/result".to_string(),
        error_endpoint: "/api/worker/error".to_string(),
        heartbeat_interval_sec,
    }))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> AppResult<Json<Value>> {
    let worker_id = WorkerId::parse(&request.worker_id)
        .map_err(|_| AppError::not_found("unknown worker"))?;
    state
        .dispatcher
        .heartbeat(&worker_id, request.metrics)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

/// Worker poll. Internal failures never hard-error toward workers: they
/// degrade to an empty lease with a poll-again hint so the fleet keeps
/// polling through store hiccups.
pub async fn lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LeaseRequest>,
) -> Json<LeaseResponse> {
    let remote_ip = Some(client_ip(&headers, None));
    match state.dispatcher.lease(&request, remote_ip).await {
        Ok(response) => Json(response),
        Err(e) => {
            warn!("lease poll degraded to empty: {e}");
            Json(LeaseResponse::wait(2))
        }
    }
}

/// Multipart completion report: `worker_id`, `job_id`, `file`.
pub async fn result(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let mut worker_id = None;
    let mut job_id = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut content_type = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("worker_id") => {
                worker_id = Some(field.text().await.map_err(|e| {
                    AppError::bad_request(format!("malformed field: {e}"))
                })?);
            }
            Some("job_id") => {
                job_id = Some(field.text().await.map_err(|e| {
                    AppError::bad_request(format!("malformed field: {e}"))
                })?);
            }
            Some("file") => {
                content_type = field.content_type().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            AppError::bad_request(format!("malformed upload: {e}"))
                        })?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let worker_id =
        worker_id.ok_or_else(|| AppError::bad_request("missing worker_id"))?;
    let job_id = job_id.ok_or_else(|| AppError::bad_request("missing job_id"))?;
    let bytes = bytes.ok_or_else(|| AppError::bad_request("missing file"))?;

    state
        .dispatcher
        .submit_result(&worker_id, &job_id, &bytes, content_type.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn error(
    State(state): State<AppState>,
    Json(request): Json<WorkerErrorRequest>,
) -> AppResult<Json<Value>> {
    state.dispatcher.worker_error(&request).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Admin view of the registry, stale workers included.
pub async fn list(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let workers = state.dispatcher.workers().await?;
    let now = now_ms();
    let stale_sec = state.config.dispatch.heartbeat_stale_sec;
    let items: Vec<Value> = workers
        .into_iter()
        .map(|worker| {
            let online = worker.is_online(now, stale_sec);
            json!({ "worker": worker, "online": online })
        })
        .collect();
    Ok(Json(json!({ "items": items })))
}
