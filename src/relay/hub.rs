use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::auth::Identity;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::registry::{ConnectionRegistry, Target};
use crate::relay::types::{ConnectionId, Outbound, ServerEvent};
use crate::relay::typing::TypingTracker;
use crate::storage::UserId;

#[derive(Default)]
struct HubState {
    registry: ConnectionRegistry,
    typing: TypingTracker,
}

/// What a removed connection leaves behind
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub identity: Identity,
    /// The connection was in the typing set when it left
    pub was_typing: bool,
    /// The user still has another active connection
    pub user_still_online: bool,
}

/// Shared relay state: the connection registry and the typing tracker behind
/// one lock.
///
/// Every method takes the lock once, so target lists and snapshots are
/// consistent with each other. Presence events are pushed while the lock is
/// held, which keeps them in mutation order on every channel. Chat messages
/// go out after the lock is released via [`deliver`].
#[derive(Clone, Default)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection and greet it with `authenticated` before any other
    /// event can reach it
    pub fn admit(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        outbound: Outbound,
    ) -> RelayResult<()> {
        let mut state = self.state.lock();
        let greeting = ServerEvent::authenticated(&identity);
        state
            .registry
            .admit(connection_id, identity, outbound.clone())?;
        let _ = outbound.send(greeting);
        Ok(())
    }

    /// Drop a connection from the registry and the typing set together
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<Departure> {
        let mut state = self.state.lock();
        let identity = state.registry.remove(connection_id)?;
        let was_typing = state.typing.clear(connection_id);
        let user_still_online = state.registry.is_user_online(&identity.user_id);

        Some(Departure {
            identity,
            was_typing,
            user_still_online,
        })
    }

    pub fn snapshot(&self) -> Vec<Identity> {
        self.state.lock().registry.snapshot()
    }

    pub fn stamp(&self, connection_id: &ConnectionId) -> Option<(Identity, DateTime<Utc>)> {
        self.state.lock().registry.stamp(connection_id)
    }

    /// Update typing state for an active connection. Returns whether the set changed.
    pub fn set_typing(&self, connection_id: ConnectionId, is_typing: bool) -> RelayResult<bool> {
        let mut state = self.state.lock();
        let username = state
            .registry
            .identity(&connection_id)
            .map(|identity| identity.username.clone())
            .ok_or(RelayError::NotAuthenticated)?;

        Ok(state.typing.set_typing(connection_id, &username, is_typing))
    }

    pub fn all_targets(&self) -> Vec<Target> {
        self.state.lock().registry.all_targets()
    }

    /// Send one event to every active connection
    pub fn broadcast(&self, event: &ServerEvent) -> (usize, usize) {
        let state = self.state.lock();
        deliver(&state.registry.all_targets(), event)
    }

    /// Snapshot the roster and send it to every active connection.
    ///
    /// Returns the number of users in the roster sent.
    pub fn publish_roster(&self) -> usize {
        let state = self.state.lock();
        let users = state.registry.snapshot();
        let online = users.len();
        deliver(&state.registry.all_targets(), &ServerEvent::RosterUpdate { users });
        online
    }

    /// Snapshot the typing set and send it to every active connection
    pub fn publish_typing(&self) {
        let state = self.state.lock();
        let usernames = state.typing.active_typists();
        deliver(
            &state.registry.all_targets(),
            &ServerEvent::TypingUsersUpdate { usernames },
        );
    }

    /// Send the current roster to one connection. Returns false if it is not active.
    pub fn send_roster_to(&self, connection_id: &ConnectionId) -> bool {
        let state = self.state.lock();
        let Some(target) = state.registry.target(connection_id) else {
            return false;
        };
        let users = state.registry.snapshot();
        deliver(&[target], &ServerEvent::RosterUpdate { users }) == (1, 0)
    }

    /// Every connection of the recipient plus the sending connection, each once
    pub fn direct_targets(&self, sender: &ConnectionId, recipient_id: &UserId) -> Vec<Target> {
        let state = self.state.lock();
        let mut targets = state.registry.targets_for_user(recipient_id);
        if let Some(own) = state.registry.target(sender) {
            targets.push(own);
        }

        let mut seen = HashSet::new();
        targets.retain(|t| seen.insert(t.connection_id));
        targets
    }

    pub fn is_user_online(&self, user_id: &UserId) -> bool {
        self.state.lock().registry.is_user_online(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().registry.connection_count()
    }

    pub fn online_user_count(&self) -> usize {
        self.state.lock().registry.online_user_count()
    }
}

/// Push an event to each target. A closed channel only affects that target.
///
/// Returns `(delivered, failed)`.
pub fn deliver(targets: &[Target], event: &ServerEvent) -> (usize, usize) {
    let mut delivered = 0;
    let mut failed = 0;

    for target in targets {
        if target.outbound.send(event.clone()).is_ok() {
            delivered += 1;
        } else {
            failed += 1;
            warn!(connection_id = %target.connection_id, "Dropping event for closed connection");
        }
    }

    (delivered, failed)
}
