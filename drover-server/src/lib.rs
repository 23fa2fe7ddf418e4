//! # drover-server
//!
//! HTTP control plane for the drover GPU job dispatcher:
//!
//! - **Submission gateway**: multipart upload, blob persistence, queueing
//! - **Worker protocol**: register / heartbeat / lease / result / error
//! - **Live progress**: per-job server-sent-event streams
//! - **Admin surface**: JWT-gated job listing, cancel/retry/delete, metrics
//!
//! The server is stateless; every replica coordinates through the shared
//! store in `drover-core`.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use infra::config::{AuthConfig, Config};
pub use routes::create_router;
