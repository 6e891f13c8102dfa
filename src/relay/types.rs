use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Identity;
use crate::storage::{Message, UserId};

/// Unique identifier for a transport session, never reused
pub type ConnectionId = Uuid;

/// Sending half of a connection's outbound event stream
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Events a client sends over its connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Present a session token to become Active
    Authenticate { token: String },

    /// Broadcast a message to everyone online
    SendMessage { content: String },

    /// Send a message to one user (all of their devices)
    SendDirectMessage { recipient_id: UserId, content: String },

    /// Start or stop the typing indicator
    Typing { is_typing: bool },
}

/// Events the server pushes to a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    // === Session ===
    /// Authentication succeeded
    Authenticated { user_id: UserId, username: String },

    /// Authentication failed; the connection stays unauthenticated
    AuthError { reason: String },

    // === Presence ===
    /// Everyone currently online, one entry per user
    RosterUpdate { users: Vec<Identity> },

    UserJoined { user_id: UserId, username: String },

    UserLeft { user_id: UserId, username: String },

    /// Usernames of connections currently typing
    TypingUsersUpdate { usernames: Vec<String> },

    // === Messages ===
    MessageReceived(Message),

    // === Errors ===
    /// A request from this connection could not be carried out
    OperationError { code: String, reason: String },
}

impl ServerEvent {
    pub fn user_joined(identity: &Identity) -> Self {
        ServerEvent::UserJoined {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
        }
    }

    pub fn user_left(identity: &Identity) -> Self {
        ServerEvent::UserLeft {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
        }
    }

    pub fn authenticated(identity: &Identity) -> Self {
        ServerEvent::Authenticated {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
        }
    }
}
