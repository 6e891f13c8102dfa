use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    Extension, Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{hash_password, verify_password, AuthUser, IdentityService, PasswordError};
use crate::state::ServerState;
use crate::storage::{CreateUser, StorageError, User, MAX_EMAIL_LENGTH, MAX_USERNAME_LENGTH};

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error half of every JSON handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

pub(crate) fn internal_error() -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error", "INTERNAL_ERROR")
}

/// Registration request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Account fields safe to hand back to clients
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
        }
    }
}

/// Register and login response
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
}

/// Session validation response
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub valid: bool,
    pub user_id: Option<String>,
    pub expires_in_seconds: Option<u64>,
}

/// Reject registration input the users table cannot hold
fn validate_registration(username: &str, email: &str) -> Result<(), ApiError> {
    let invalid = |message: String| -> Result<(), ApiError> {
        Err(api_error(StatusCode::BAD_REQUEST, message, "INVALID_INPUT"))
    };

    if username.is_empty() {
        return invalid("Username is required".to_string());
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return invalid(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LENGTH
        ));
    }
    if !email.contains('@') {
        return invalid("A valid email is required".to_string());
    }
    if email.chars().count() > MAX_EMAIL_LENGTH {
        return invalid(format!("Email must be at most {} characters", MAX_EMAIL_LENGTH));
    }
    Ok(())
}

/// Registration endpoint
pub async fn register(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let username = request.username.trim();
    let email = request.email.trim().to_lowercase();
    validate_registration(username, &email)?;

    let password_hash = hash_password(&request.password).map_err(|e| match e {
        PasswordError::TooShort(_) => api_error(StatusCode::BAD_REQUEST, e.to_string(), "INVALID_INPUT"),
        other => {
            warn!("Password hashing failed: {}", other);
            internal_error()
        }
    })?;

    let user = state
        .user_store
        .create_user(CreateUser {
            username: username.to_string(),
            email,
            password_hash,
        })
        .await
        .map_err(|e| match e {
            StorageError::DuplicateUser(_) => api_error(
                StatusCode::BAD_REQUEST,
                "User with this email or username already exists",
                "USER_EXISTS",
            ),
            other => {
                warn!("Database error during registration: {}", other);
                internal_error()
            }
        })?;

    let token = state.identity.issue_token(&user.id).await.map_err(|e| {
        warn!("Failed to issue token for new user {}: {}", user.id, e);
        internal_error()
    })?;

    info!(user_id = %user.id, username = %user.username, "User registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.into(),
            token,
        }),
    ))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let client_ip = addr.ip();
    let rate_limiter = &state.auth_state.rate_limiter;

    if rate_limiter.is_rate_limited(client_ip) {
        warn!("Rate limited login from {}", client_ip);
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many failed authentication attempts. Please try again later.",
            "RATE_LIMITED",
        ));
    }

    let email = request.email.trim().to_lowercase();
    let invalid = || {
        rate_limiter.record_failure(client_ip);
        api_error(StatusCode::UNAUTHORIZED, "Invalid credentials", "AUTH_FAILED")
    };

    let user = match state.user_store.get_user_by_email(&email).await {
        Ok(user) => user,
        Err(StorageError::UserNotFound(_)) => {
            warn!("Login attempt for unknown email: {}", email);
            return Err(invalid());
        }
        Err(e) => {
            warn!("Database error during login: {}", e);
            return Err(internal_error());
        }
    };

    match verify_password(&request.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            warn!(user_id = %user.id, "Invalid password");
            return Err(invalid());
        }
        Err(e) => {
            warn!("Password verification error: {}", e);
            return Err(internal_error());
        }
    }

    let token = state.identity.issue_token(&user.id).await.map_err(|e| {
        warn!("Failed to issue token for {}: {}", user.id, e);
        internal_error()
    })?;

    rate_limiter.clear(client_ip);
    info!(user_id = %user.id, "User logged in");
    Ok(Json(AuthResponse {
        user: user.into(),
        token,
    }))
}

/// Current user endpoint
pub async fn me(
    State(state): State<Arc<ServerState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<MeResponse>, ApiError> {
    match state.user_store.get_user(&auth.user_id).await {
        Ok(user) => Ok(Json(MeResponse { user: user.into() })),
        Err(StorageError::UserNotFound(_)) => Err(api_error(
            StatusCode::UNAUTHORIZED,
            "User no longer exists",
            "UNAUTHORIZED",
        )),
        Err(e) => {
            warn!("Database error loading user {}: {}", auth.user_id, e);
            Err(internal_error())
        }
    }
}

/// Logout endpoint
pub async fn logout(
    State(state): State<Arc<ServerState>>,
    Extension(auth): Extension<AuthUser>,
) -> Json<LogoutResponse> {
    state.auth_state.session_manager.revoke_session(&auth.token);

    // Live connections keep their presence; only the stored flag is cleared
    if let Err(e) = state
        .user_store
        .set_user_online(&auth.user_id, false, Some(Utc::now()))
        .await
    {
        warn!("Failed to mark {} offline on logout: {}", auth.user_id, e);
    }

    info!(user_id = %auth.user_id, "User logged out");
    Json(LogoutResponse {
        message: "Logged out successfully".to_string(),
    })
}

/// Session validation endpoint
pub async fn validate_session(
    State(state): State<Arc<ServerState>>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
) -> Json<SessionResponse> {
    let invalid = SessionResponse {
        valid: false,
        user_id: None,
        expires_in_seconds: None,
    };

    let Some(TypedHeader(Authorization(bearer))) = auth_header else {
        return Json(invalid);
    };

    match state
        .auth_state
        .session_manager
        .validate_token(bearer.token())
    {
        Ok(user_id) => Json(SessionResponse {
            valid: true,
            user_id: Some(user_id),
            expires_in_seconds: Some(state.auth_state.session_manager.timeout_seconds()),
        }),
        Err(_) => Json(invalid),
    }
}
