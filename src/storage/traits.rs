use async_trait::async_trait;

use crate::storage::types::{Message, MessageFilter, NewMessage, UserId};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Username or email already exists: {0}")]
    DuplicateUser(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage backend for chat messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, returning the stored record with its assigned id
    async fn save_message(&self, message: NewMessage) -> StorageResult<Message>;

    /// Find messages matching a filter, newest first
    async fn find_messages(&self, filter: MessageFilter, limit: i64) -> StorageResult<Vec<Message>>;
}
