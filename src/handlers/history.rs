use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::auth::{api_error, ApiError};
use crate::auth::AuthUser;
use crate::state::ServerState;
use crate::storage::{Message, MessageFilter, UserFilter, UserId};

/// Roster entry for the user directory
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Latest public messages, newest first
pub async fn list_messages(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<Message>>, ApiError> {
    state
        .message_store
        .find_messages(MessageFilter::Public, state.config.history_limit)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("Failed to load public messages: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching messages",
                "INTERNAL_ERROR",
            )
        })
}

/// Private messages sent or received by the caller, newest first
pub async fn list_private_messages(
    State(state): State<Arc<ServerState>>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<Message>>, ApiError> {
    if auth.user_id != user_id {
        warn!(caller = %auth.user_id, requested = %user_id, "Private history request for another user");
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "Cannot read another user's private messages",
            "FORBIDDEN",
        ));
    }

    state
        .message_store
        .find_messages(MessageFilter::PrivateFor(user_id), state.config.history_limit)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("Failed to load private messages: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching private messages",
                "INTERNAL_ERROR",
            )
        })
}

/// Every registered user. Online state comes from live connections, not the store.
pub async fn list_users(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let users = state
        .user_store
        .find_users(UserFilter::All)
        .await
        .map_err(|e| {
            warn!("Failed to load users: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching users",
                "INTERNAL_ERROR",
            )
        })?;

    Ok(Json(
        users
            .into_iter()
            .map(|user| UserSummary {
                is_online: state.hub.is_user_online(&user.id),
                id: user.id,
                username: user.username,
                last_seen: user.last_seen,
            })
            .collect(),
    ))
}
