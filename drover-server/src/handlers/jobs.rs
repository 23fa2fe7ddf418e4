//! Job surface: submission, listing, admin operations, client views.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, header},
};
use drover_model::api::{JobsPage, SubmitAccepted};
use drover_model::{JobEvent, JobId, JobStatus};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::auth::middleware::{client_id_from, client_ip};
use crate::errors::{AppError, AppResult};
use drover_core::dispatch::{ArtifactKind, SubmitUpload};

const MY_JOBS_LIMIT: usize = 50;

fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    JobId::parse(raw).map_err(|_| AppError::not_found("unknown job"))
}

/// Multipart submission; also mounted at the legacy `/swap` path.
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<Json<SubmitAccepted>> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut filename = String::new();
    let mut content_type = None;
    let mut form_client_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().unwrap_or("upload").to_string();
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
            Some("client_id") => {
                form_client_id = field.text().await.ok().filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| AppError::bad_request("missing file"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("empty upload"));
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let upload = SubmitUpload {
        bytes,
        content_type: content_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        filename,
        client_id: form_client_id.or_else(|| client_id_from(&headers)),
        requester_ip: client_ip(&headers, None),
        user_agent,
    };

    let accepted = state.dispatcher.submit(upload).await?;
    Ok(Json(accepted))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub q: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<JobsPage>> {
    let status = match &query.status {
        Some(raw) => Some(
            raw.parse::<JobStatus>()
                .map_err(|e| AppError::bad_request(e.to_string()))?,
        ),
        None => None,
    };
    let items = state
        .dispatcher
        .list_jobs(
            status,
            query.q.as_deref(),
            query.offset.unwrap_or(0),
            query.limit.unwrap_or(100).min(500),
        )
        .await?;
    let count = items.len();
    Ok(Json(JobsPage { items, count }))
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let job_id = parse_job_id(&id)?;
    let job = state.dispatcher.job(&job_id).await?;
    let events: Vec<JobEvent> = state.dispatcher.events(&job_id).await?;
    Ok(Json(json!({ "job": job, "events": events })))
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub kind: String,
}

pub async fn signed_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SignedUrlQuery>,
) -> AppResult<Json<Value>> {
    let job_id = parse_job_id(&id)?;
    let kind = ArtifactKind::parse(&query.kind)?;
    let url = state.dispatcher.artifact_url(&job_id, kind).await?;
    Ok(Json(json!({ "url": url })))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let job_id = parse_job_id(&id)?;
    let job = state.dispatcher.cancel_job(&job_id).await?;
    Ok(Json(json!({ "ok": true, "status": job.status })))
}

pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let job_id = parse_job_id(&id)?;
    let new_id = state.dispatcher.retry_job(&job_id).await?;
    Ok(Json(json!({ "new_job_id": new_id })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let job_id = parse_job_id(&id)?;
    state.dispatcher.delete_job(&job_id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Jobs belonging to the calling client, newest first.
pub async fn my_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<JobsPage>> {
    let client_id = client_id_from(&headers)
        .ok_or_else(|| AppError::bad_request("missing client id"))?;
    let items = state
        .dispatcher
        .jobs_for_client(&client_id, MY_JOBS_LIMIT)
        .await?;
    let count = items.len();
    Ok(Json(JobsPage { items, count }))
}

#[derive(Debug, Deserialize)]
pub struct MySignedUrlQuery {
    pub job_id: String,
    pub kind: String,
}

pub async fn my_signed_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MySignedUrlQuery>,
) -> AppResult<Json<Value>> {
    let client_id = client_id_from(&headers)
        .ok_or_else(|| AppError::bad_request("missing client id"))?;
    let job_id = parse_job_id(&query.job_id)?;
    let kind = ArtifactKind::parse(&query.kind)?;
    let url = state
        .dispatcher
        .artifact_url_for_client(&job_id, kind, &client_id)
        .await?;
    Ok(Json(json!({ "url": url })))
}
