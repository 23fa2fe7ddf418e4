//! Admin login and identity.

use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::auth::AdminUser;
use crate::auth::jwt::mint_token;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<Value>> {
    let auth = &state.config.auth;
    let (Some(username), Some(password)) =
        (&auth.admin_username, &auth.admin_password)
    else {
        return Err(AppError::unauthorized("admin login is not configured"));
    };

    if request.username != *username || request.password != *password {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let token = mint_token(auth, &request.username)
        .map_err(|e| AppError::internal(format!("token mint failed: {e}")))?;
    Ok(Json(json!({
        "ok": true,
        "token": token,
        "user": { "username": request.username },
    })))
}

pub async fn me(Extension(admin): Extension<AdminUser>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "user": { "username": admin.username },
    }))
}
