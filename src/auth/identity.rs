use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::auth::session::SessionManager;
use crate::storage::{StorageError, UserId, UserStore};

/// Who is behind an authenticated connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// Token verification failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid authentication")]
    InvalidToken,

    #[error("Session expired")]
    ExpiredToken,

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Authentication timeout")]
    Timeout,

    #[error("Identity service unavailable")]
    Unavailable,
}

/// Issues and verifies session tokens
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Resolve a token to the identity it was issued for
    async fn verify_token(&self, token: &str) -> Result<Identity, AuthError>;

    /// Mint a token for an existing user
    async fn issue_token(&self, user_id: &UserId) -> Result<String, AuthError>;
}

/// Identity service backed by in-memory sessions and the user store
#[derive(Clone)]
pub struct SessionIdentityService {
    sessions: SessionManager,
    users: Arc<dyn UserStore>,
}

impl SessionIdentityService {
    pub fn new(sessions: SessionManager, users: Arc<dyn UserStore>) -> Self {
        Self { sessions, users }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

#[async_trait]
impl IdentityService for SessionIdentityService {
    async fn verify_token(&self, token: &str) -> Result<Identity, AuthError> {
        let user_id = self.sessions.validate_token(token)?;

        // Username comes from the store so renames show up on the next connection
        match self.users.get_user(&user_id).await {
            Ok(user) => Ok(Identity::new(user.id, user.username)),
            Err(StorageError::UserNotFound(_)) => {
                warn!(user_id = %user_id, "Token references a deleted user");
                self.sessions.revoke_user_sessions(&user_id);
                Err(AuthError::UnknownUser(user_id))
            }
            Err(e) => {
                error!(user_id = %user_id, "User lookup failed during token verification: {}", e);
                Err(AuthError::Unavailable)
            }
        }
    }

    async fn issue_token(&self, user_id: &UserId) -> Result<String, AuthError> {
        match self.users.get_user(user_id).await {
            Ok(user) => Ok(self.sessions.create_session(user.id)),
            Err(StorageError::UserNotFound(_)) => Err(AuthError::UnknownUser(user_id.clone())),
            Err(e) => {
                error!(user_id = %user_id, "User lookup failed while issuing token: {}", e);
                Err(AuthError::Unavailable)
            }
        }
    }
}
