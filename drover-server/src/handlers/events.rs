//! Per-job server-sent-event streams.
//!
//! Each connection gets the `retry:` preamble, the bounded history
//! oldest-first, then a dedicated live subscription to the job's
//! channel. Terminal event types end the stream; dropping the stream
//! releases the subscription.

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use drover_model::{JobEvent, JobId};
use serde::Deserialize;
use std::{convert::Infallible, pin::Pin, sync::Arc, time::Duration};
use tokio_stream::StreamExt;
use tracing::warn;

use crate::AppState;
use crate::auth::jwt::verify_token;
use crate::errors::{AppError, AppResult};
use drover_core::Dispatcher;

const SSE_RETRY_MS: u64 = 1000;

type SseStream =
    Pin<Box<dyn tokio_stream::Stream<Item = Result<Event, Infallible>> + Send>>;

pub async fn job_events_sse(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = JobId::parse(&id).map_err(|_| AppError::not_found("unknown job"))?;
    // 404 before the stream starts rather than an empty hang.
    state.dispatcher.job(&job_id).await?;

    let stream = build_job_event_stream(Arc::clone(&state.dispatcher), job_id).await?;
    Ok(sse_response(stream))
}

#[derive(Debug, Deserialize)]
pub struct StreamTokenQuery {
    pub token: String,
}

/// Token-as-query variant for EventSource clients that cannot set an
/// `Authorization` header.
pub async fn job_events_sse_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamTokenQuery>,
) -> AppResult<impl IntoResponse> {
    verify_token(&state.config.auth, &query.token)
        .map_err(|_| AppError::unauthorized("invalid or expired token"))?;

    let job_id = JobId::parse(&id).map_err(|_| AppError::not_found("unknown job"))?;
    state.dispatcher.job(&job_id).await?;

    let stream = build_job_event_stream(Arc::clone(&state.dispatcher), job_id).await?;
    Ok(sse_response(stream))
}

fn sse_response(stream: SseStream) -> impl IntoResponse {
    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    (
        [
            (axum::http::header::CACHE_CONTROL, "no-cache"),
            // Upstream proxies must not buffer the stream.
            (
                axum::http::HeaderName::from_static("x-accel-buffering"),
                "no",
            ),
        ],
        sse,
    )
}

async fn build_job_event_stream(
    dispatcher: Arc<Dispatcher>,
    job_id: JobId,
) -> Result<SseStream, AppError> {
    let history = dispatcher.events(&job_id).await?;

    let stream = async_stream::stream! {
        yield Ok::<Event, Infallible>(
            Event::default().retry(Duration::from_millis(SSE_RETRY_MS)),
        );

        let mut terminal = false;
        for event in &history {
            let is_terminal = event.kind.is_terminal();
            if let Some(frame) = event_frame(event) {
                yield Ok(frame);
            }
            if is_terminal {
                terminal = true;
                break;
            }
        }
        if terminal {
            return;
        }

        // Dedicated subscription for the life of this connection.
        let mut live = match dispatcher.subscribe(&job_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(job = %job_id, "event subscription failed: {e}");
                return;
            }
        };
        while let Some(event) = live.next().await {
            let is_terminal = event.kind.is_terminal();
            if let Some(frame) = event_frame(&event) {
                yield Ok(frame);
            }
            if is_terminal {
                break;
            }
        }
    };

    Ok(Box::pin(stream))
}

fn event_frame(event: &JobEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(Event::default().data(payload)),
        Err(e) => {
            warn!("failed to serialize job event: {e}");
            None
        }
    }
}
