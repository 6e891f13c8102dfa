use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::auth::Identity;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::types::{ConnectionId, Outbound};
use crate::storage::UserId;

/// A live connection that can receive events
#[derive(Debug, Clone)]
pub struct Target {
    pub connection_id: ConnectionId,
    pub outbound: Outbound,
}

struct ActiveConnection {
    identity: Identity,
    outbound: Outbound,
    /// Admission order, used to keep snapshots stable
    admitted_seq: u64,
    /// Last message timestamp handed out to this connection
    last_stamp: Option<DateTime<Utc>>,
}

/// Active connections and the identities behind them.
///
/// Has no lock of its own; the owning [`Hub`](crate::relay::Hub) serializes
/// every call so a snapshot never sees a half-applied admit or remove.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ActiveConnection>,
    next_seq: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an authenticated connection.
    ///
    /// Re-admitting the same identity is a no-op; a different identity on an
    /// already admitted connection is rejected.
    pub fn admit(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
        outbound: Outbound,
    ) -> RelayResult<()> {
        if let Some(existing) = self.connections.get(&connection_id) {
            if existing.identity == identity {
                return Ok(());
            }
            return Err(RelayError::AlreadyActive);
        }

        let admitted_seq = self.next_seq;
        self.next_seq += 1;
        self.connections.insert(
            connection_id,
            ActiveConnection {
                identity,
                outbound,
                admitted_seq,
                last_stamp: None,
            },
        );
        Ok(())
    }

    /// Remove a connection. Removing an absent connection returns `None`.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Identity> {
        self.connections
            .remove(connection_id)
            .map(|conn| conn.identity)
    }

    /// Everyone online, one entry per user, in order of each user's earliest admission
    pub fn snapshot(&self) -> Vec<Identity> {
        let mut seen = HashSet::new();
        self.ordered()
            .into_iter()
            .filter(|(_, conn)| seen.insert(conn.identity.user_id.clone()))
            .map(|(_, conn)| conn.identity.clone())
            .collect()
    }

    pub fn identity(&self, connection_id: &ConnectionId) -> Option<&Identity> {
        self.connections.get(connection_id).map(|conn| &conn.identity)
    }

    pub fn is_user_online(&self, user_id: &UserId) -> bool {
        self.connections
            .values()
            .any(|conn| conn.identity.user_id == *user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn online_user_count(&self) -> usize {
        self.connections
            .values()
            .map(|conn| conn.identity.user_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Every active connection
    pub fn all_targets(&self) -> Vec<Target> {
        self.ordered().into_iter().map(to_target).collect()
    }

    /// Every active connection of one user
    pub fn targets_for_user(&self, user_id: &UserId) -> Vec<Target> {
        self.ordered()
            .into_iter()
            .filter(|(_, conn)| conn.identity.user_id == *user_id)
            .map(to_target)
            .collect()
    }

    pub fn target(&self, connection_id: &ConnectionId) -> Option<Target> {
        self.connections.get(connection_id).map(|conn| Target {
            connection_id: *connection_id,
            outbound: conn.outbound.clone(),
        })
    }

    /// Resolve the sender behind a connection and hand out a receipt timestamp
    /// that never goes backwards for that connection.
    pub fn stamp(&mut self, connection_id: &ConnectionId) -> Option<(Identity, DateTime<Utc>)> {
        let conn = self.connections.get_mut(connection_id)?;
        let now = Utc::now();
        let stamp = match conn.last_stamp {
            Some(last) if last > now => last,
            _ => now,
        };
        conn.last_stamp = Some(stamp);
        Some((conn.identity.clone(), stamp))
    }

    fn ordered(&self) -> Vec<(ConnectionId, &ActiveConnection)> {
        let mut conns: Vec<_> = self
            .connections
            .iter()
            .map(|(id, conn)| (*id, conn))
            .collect();
        conns.sort_by_key(|(_, conn)| conn.admitted_seq);
        conns
    }
}

fn to_target((connection_id, conn): (ConnectionId, &ActiveConnection)) -> Target {
    Target {
        connection_id,
        outbound: conn.outbound.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn outbound() -> Outbound {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    #[test]
    fn test_admit_and_lookup() {
        let mut registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        let alice = Identity::new("u1", "alice");

        registry.admit(conn, alice.clone(), outbound()).unwrap();

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.identity(&conn), Some(&alice));
        assert!(registry.is_user_online(&"u1".to_string()));
        assert!(!registry.is_user_online(&"u2".to_string()));
    }

    #[test]
    fn test_admit_same_identity_is_noop() {
        let mut registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        let alice = Identity::new("u1", "alice");

        registry.admit(conn, alice.clone(), outbound()).unwrap();
        registry.admit(conn, alice, outbound()).unwrap();

        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_admit_different_identity_rejected() {
        let mut registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();

        registry
            .admit(conn, Identity::new("u1", "alice"), outbound())
            .unwrap();
        let err = registry
            .admit(conn, Identity::new("u2", "bob"), outbound())
            .unwrap_err();

        assert!(matches!(err, RelayError::AlreadyActive));
        assert_eq!(registry.identity(&conn).unwrap().user_id, "u1");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        registry
            .admit(conn, Identity::new("u1", "alice"), outbound())
            .unwrap();

        assert_eq!(registry.remove(&conn), Some(Identity::new("u1", "alice")));
        assert_eq!(registry.remove(&conn), None);
        assert_eq!(registry.remove(&Uuid::new_v4()), None);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_snapshot_dedupes_by_user_in_admission_order() {
        let mut registry = ConnectionRegistry::new();
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();
        let bob = Uuid::new_v4();

        registry
            .admit(phone, Identity::new("u1", "alice"), outbound())
            .unwrap();
        registry
            .admit(bob, Identity::new("u2", "bob"), outbound())
            .unwrap();
        registry
            .admit(laptop, Identity::new("u1", "alice"), outbound())
            .unwrap();

        assert_eq!(
            registry.snapshot(),
            vec![Identity::new("u1", "alice"), Identity::new("u2", "bob")]
        );
        assert_eq!(registry.connection_count(), 3);
        assert_eq!(registry.online_user_count(), 2);
    }

    #[test]
    fn test_snapshot_after_remove_keeps_other_devices() {
        let mut registry = ConnectionRegistry::new();
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();

        registry
            .admit(phone, Identity::new("u1", "alice"), outbound())
            .unwrap();
        registry
            .admit(laptop, Identity::new("u1", "alice"), outbound())
            .unwrap();

        registry.remove(&phone);
        assert_eq!(registry.snapshot(), vec![Identity::new("u1", "alice")]);

        registry.remove(&laptop);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_targets_for_user() {
        let mut registry = ConnectionRegistry::new();
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();
        let bob = Uuid::new_v4();

        registry
            .admit(phone, Identity::new("u1", "alice"), outbound())
            .unwrap();
        registry
            .admit(laptop, Identity::new("u1", "alice"), outbound())
            .unwrap();
        registry
            .admit(bob, Identity::new("u2", "bob"), outbound())
            .unwrap();

        let ids: Vec<_> = registry
            .targets_for_user(&"u1".to_string())
            .into_iter()
            .map(|t| t.connection_id)
            .collect();
        assert_eq!(ids, vec![phone, laptop]);
        assert_eq!(registry.all_targets().len(), 3);
        assert!(registry.targets_for_user(&"u3".to_string()).is_empty());
    }

    #[test]
    fn test_stamp_is_monotonic_per_connection() {
        let mut registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        registry
            .admit(conn, Identity::new("u1", "alice"), outbound())
            .unwrap();

        let (_, first) = registry.stamp(&conn).unwrap();
        let (_, second) = registry.stamp(&conn).unwrap();
        assert!(second >= first);

        assert!(registry.stamp(&Uuid::new_v4()).is_none());
    }
}
