use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::jwt::verify_token;
use crate::AppState;
use crate::errors::AppError;

/// Authenticated admin identity, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub username: String,
}

pub async fn admin_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&request)?;
    let claims = verify_token(&state.config.auth, &token)
        .map_err(|_| AppError::unauthorized("invalid or expired token"))?;

    request.extensions_mut().insert(AdminUser {
        username: claims.sub,
    });
    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Result<String, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))
}

/// Caller identity for the `/my` surface: `X-Client-Id` header first,
/// `client_id` cookie second.
pub fn client_id_from(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-client-id")
        && let Ok(raw) = value.to_str()
        && !raw.is_empty()
    {
        return Some(raw.to_string());
    }
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "client_id" && !value.is_empty()).then(|| value.to_string())
    })
}

/// Requester address as the gateway records it: proxy headers first,
/// then the socket peer.
pub fn client_ip(
    headers: &axum::http::HeaderMap,
    peer: Option<std::net::SocketAddr>,
) -> String {
    if let Some(value) = headers.get("x-forwarded-for")
        && let Ok(raw) = value.to_str()
        && let Some(first) = raw.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }
    if let Some(value) = headers.get("x-real-ip")
        && let Ok(raw) = value.to_str()
        && !raw.is_empty()
    {
        return raw.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn client_id_prefers_header_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("x-client-id", HeaderValue::from_static("abc"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("client_id=cookie-id; theme=dark"),
        );
        assert_eq!(client_id_from(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn client_id_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; client_id=cookie-id"),
        );
        assert_eq!(client_id_from(&headers).as_deref(), Some("cookie-id"));
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, None), "1.2.3.4");
    }

    #[test]
    fn falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let peer = "192.168.1.9:4242".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "192.168.1.9");
    }
}
