use crate::auth::AuthError;
use crate::relay::types::ServerEvent;
use crate::storage::StorageError;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors scoped to a single connection's request. None of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Connection is already authenticated as a different user")]
    AlreadyActive,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),
}

impl RelayError {
    /// Stable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Auth(_) => "AUTH_FAILED",
            RelayError::NotAuthenticated => "NOT_AUTHENTICATED",
            RelayError::AlreadyActive => "ALREADY_ACTIVE",
            RelayError::InvalidMessage(_) => "INVALID_MESSAGE",
            RelayError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// The event that reports this error to the originating connection
    pub fn to_event(&self) -> ServerEvent {
        match self {
            RelayError::Auth(e) => ServerEvent::AuthError {
                reason: e.to_string(),
            },
            // Store internals stay in the server log
            RelayError::Persistence(_) => ServerEvent::OperationError {
                code: self.code().to_string(),
                reason: "Error saving message".to_string(),
            },
            other => ServerEvent::OperationError {
                code: other.code().to_string(),
                reason: other.to_string(),
            },
        }
    }
}
