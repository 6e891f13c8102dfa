use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::auth::session::{AuthRateLimiter, SessionManager};
use crate::storage::UserId;

/// Authentication state shared with middleware
#[derive(Clone)]
pub struct AuthState {
    pub session_manager: SessionManager,
    pub rate_limiter: AuthRateLimiter,
}

impl AuthState {
    pub fn new(session_manager: SessionManager) -> Self {
        Self {
            session_manager,
            rate_limiter: AuthRateLimiter::default(),
        }
    }
}

/// Caller resolved by `auth_middleware`, available as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub token: String,
}

/// Pull the token out of an Authorization header value.
/// Accepts both "Bearer <token>" and a raw token.
pub fn bearer_token(value: &str) -> &str {
    value.strip_prefix("Bearer ").unwrap_or(value).trim()
}

/// Authentication middleware for protected routes
pub async fn auth_middleware(
    State(state): State<Arc<AuthState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let client_ip = addr.ip();

    if state.rate_limiter.is_rate_limited(client_ip) {
        warn!("Rate limited request from {}", client_ip);
        return rate_limited_response();
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|value| bearer_token(value).to_string());

    let Some(token) = token else {
        state.rate_limiter.record_failure(client_ip);
        return unauthorized_response("Missing Authorization header");
    };

    let user_id = match state.session_manager.validate_token(&token) {
        Ok(user_id) => user_id,
        Err(e) => {
            if state.rate_limiter.record_failure(client_ip) {
                warn!("IP {} is now rate limited after failed auth", client_ip);
            }
            return unauthorized_response(&e.to_string());
        }
    };

    state.rate_limiter.clear(client_ip);
    request.extensions_mut().insert(AuthUser { user_id, token });

    next.run(request).await
}

/// Create rate limited response
pub fn rate_limited_response() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many failed authentication attempts. Please try again later.",
            "code": "RATE_LIMITED"
        })),
    )
        .into_response()
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": message,
            "code": "UNAUTHORIZED"
        })),
    )
        .into_response()
}
