use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users
pub type UserId = String;

/// Unique identifier for persisted chat messages
pub type MessageId = Uuid;

/// A chat message as stored by the persistence layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    /// Display name captured at send time; never re-resolved
    pub sender_name: String,
    pub is_private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

/// Message creation request
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub recipient_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    pub fn is_private(&self) -> bool {
        self.recipient_id.is_some()
    }

    /// Attach an id, producing the immutable stored record
    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            is_private: self.is_private(),
            content: self.content,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            recipient_id: self.recipient_id,
            timestamp: self.timestamp,
        }
    }
}

/// Which messages a history query selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// Broadcast messages only
    Public,
    /// Private messages sent or received by a user
    PrivateFor(UserId),
}

impl MessageFilter {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            MessageFilter::Public => !message.is_private,
            MessageFilter::PrivateFor(user_id) => {
                message.is_private
                    && (message.sender_id == *user_id
                        || message.recipient_id.as_ref() == Some(user_id))
            }
        }
    }
}

/// Which users a lookup selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFilter {
    All,
    /// Users whose stored online flag is set (may lag the live registry)
    Online,
}
