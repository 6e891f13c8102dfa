//! In-memory persistence backend.
//!
//! Backs `STORAGE_BACKEND=memory` deployments and the test suite. Data lives
//! only as long as the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::traits::{MessageStore, StorageError, StorageResult};
use super::types::{Message, MessageFilter, NewMessage, UserFilter, UserId};
use super::users::{CreateUser, User, UserStore};

#[derive(Default)]
struct MemoryInner {
    users: HashMap<UserId, User>,
    messages: Vec<Message>,
}

/// Message and user store held entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted messages
    pub fn message_count(&self) -> usize {
        self.inner.read().messages.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save_message(&self, message: NewMessage) -> StorageResult<Message> {
        let stored = message.into_message(Uuid::new_v4());
        self.inner.write().messages.push(stored.clone());
        Ok(stored)
    }

    async fn find_messages(&self, filter: MessageFilter, limit: i64) -> StorageResult<Vec<Message>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let inner = self.inner.read();

        // Newest first; equal timestamps stay in reverse receipt order
        let mut matching: Vec<Message> = inner
            .messages
            .iter()
            .rev()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);

        Ok(matching)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: CreateUser) -> StorageResult<User> {
        let mut inner = self.inner.write();

        let taken = inner
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email);
        if taken {
            return Err(StorageError::DuplicateUser(user.username));
        }

        let created = User {
            id: Uuid::new_v4().to_string(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_online: false,
            last_seen: None,
            created_at: Utc::now(),
        };
        inner.users.insert(created.id.clone(), created.clone());

        Ok(created)
    }

    async fn get_user(&self, id: &UserId) -> StorageResult<User> {
        self.inner
            .read()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::UserNotFound(id.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<User> {
        self.inner
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| StorageError::UserNotFound(email.to_string()))
    }

    async fn get_user_by_username(&self, username: &str) -> StorageResult<User> {
        self.inner
            .read()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| StorageError::UserNotFound(username.to_string()))
    }

    async fn find_users(&self, filter: UserFilter) -> StorageResult<Vec<User>> {
        let mut users: Vec<User> = self
            .inner
            .read()
            .users
            .values()
            .filter(|u| match filter {
                UserFilter::All => true,
                UserFilter::Online => u.is_online,
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn set_user_online(
        &self,
        id: &UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let user = inner
            .users
            .get_mut(id)
            .ok_or_else(|| StorageError::UserNotFound(id.clone()))?;

        user.is_online = is_online;
        if last_seen.is_some() {
            user.last_seen = last_seen;
        }
        Ok(())
    }

    async fn delete_user(&self, id: &UserId) -> StorageResult<()> {
        self.inner
            .write()
            .users
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::UserNotFound(id.clone()))
    }
}
