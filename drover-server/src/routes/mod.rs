//! Router assembly.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::AppState;
use crate::auth::middleware::admin_middleware;
use crate::handlers::{auth, blob, events, jobs, ops, workers};
use crate::infra::config::Config;

/// Uploads are image-sized; cap bodies well above that but below abuse.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Liveness
        .route("/health", get(ops::health))
        .route("/ping", get(ops::ping))
        // Public pool diagnostics
        .route("/gpu_status", get(ops::gpu_status))
        .route("/wait_time", get(ops::wait_time))
        // Admin login
        .route("/auth/login", post(auth::login))
        // Worker protocol
        .route("/worker/register", post(workers::register))
        .route("/worker/heartbeat", post(workers::heartbeat))
        .route("/worker/lease", post(workers::lease))
        .route("/worker/result", post(workers::result))
        .route("/worker/error", post(workers::error))
        // Submission (plus the legacy alias)
        .route("/jobs", post(jobs::submit))
        .route("/swap", post(jobs::submit))
        // Live progress
        .route("/jobs/{id}/events", get(events::job_events_sse))
        .route("/jobs/{id}/events/stream", get(events::job_events_sse_token))
        // Client-owned views
        .route("/my/jobs", get(jobs::my_jobs))
        .route("/my/signed_url", get(jobs::my_signed_url))
        .merge(create_admin_routes(state.clone()));

    Router::new()
        .nest("/api", api)
        .route("/blob/{*key}", get(blob::serve_blob))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Routes behind the admin bearer token.
fn create_admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(auth::me))
        .route("/jobs", get(jobs::list))
        .route(
            "/jobs/{id}",
            get(jobs::detail).delete(jobs::delete),
        )
        .route("/jobs/{id}/signed_url", get(jobs::signed_url))
        .route("/jobs/{id}/cancel", post(jobs::cancel))
        .route("/jobs/{id}/retry", post(jobs::retry))
        .route("/workers", get(workers::list))
        .route("/metrics", get(ops::metrics))
        .route_layer(middleware::from_fn_with_state(state, admin_middleware))
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring unparseable CORS origin '{origin}'");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false)
}
