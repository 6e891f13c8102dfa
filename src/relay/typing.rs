use std::collections::HashMap;

use crate::relay::types::ConnectionId;

/// Which connections are currently typing.
///
/// Keyed by connection, so a user typing on two devices appears twice.
#[derive(Debug, Default)]
pub struct TypingTracker {
    typing: HashMap<ConnectionId, String>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the typing state of a connection. Returns whether the set changed.
    pub fn set_typing(&mut self, connection_id: ConnectionId, username: &str, is_typing: bool) -> bool {
        if is_typing {
            self.typing
                .insert(connection_id, username.to_string())
                .is_none()
        } else {
            self.typing.remove(&connection_id).is_some()
        }
    }

    /// Forget a connection. Returns whether it was typing.
    pub fn clear(&mut self, connection_id: &ConnectionId) -> bool {
        self.typing.remove(connection_id).is_some()
    }

    /// Usernames of typing connections, sorted
    pub fn active_typists(&self) -> Vec<String> {
        let mut names: Vec<String> = self.typing.values().cloned().collect();
        names.sort();
        names
    }
}
