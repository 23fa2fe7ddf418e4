//! Signed-URL redemption for the filesystem blob backend.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::errors::{AppError, AppResult};
use drover_core::blob::SignedQuery;

/// `GET /blob/{key}?exp=…&sig=…`. Only mounted usefully when the
/// filesystem backend is active; other deployments serve their own URLs.
pub async fn serve_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> AppResult<Response> {
    let Some(fs) = &state.fs_blob else {
        return Err(AppError::not_found("blob service not available"));
    };
    if !fs.verify(&key, &query) {
        return Err(AppError::forbidden("invalid or expired signature"));
    }

    use drover_core::BlobStore as _;
    match fs.get(&key).await? {
        Some((bytes, content_type)) => Ok((
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "private, max-age=60".to_string()),
            ],
            bytes,
        )
            .into_response()),
        None => Err(AppError::not_found("no such blob")),
    }
}
