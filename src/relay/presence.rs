use tracing::debug;

use crate::auth::Identity;
use crate::relay::hub::Hub;
use crate::relay::types::{ConnectionId, ServerEvent};

/// Tells active connections who is online and who is typing.
///
/// Callers invoke these after the hub mutation that caused them. Each event
/// is snapshotted and sent under the hub lock, so the last roster or typing
/// list a connection receives always matches the hub.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    hub: Hub,
}

impl PresenceBroadcaster {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    pub fn announce_join(&self, identity: &Identity) {
        self.hub.broadcast(&ServerEvent::user_joined(identity));
    }

    pub fn announce_leave(&self, identity: &Identity) {
        self.hub.broadcast(&ServerEvent::user_left(identity));
    }

    pub fn publish_roster(&self) {
        let online = self.hub.publish_roster();
        debug!(online, "Published roster");
    }

    pub fn publish_typing(&self) {
        self.hub.publish_typing();
    }

    /// Send the current roster to one connection only
    pub fn send_roster_to(&self, connection_id: &ConnectionId) {
        if !self.hub.send_roster_to(connection_id) {
            debug!(connection_id = %connection_id, "Roster not sent, connection inactive");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use uuid::Uuid;

    fn join(hub: &Hub, user_id: &str, username: &str) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        hub.admit(conn, Identity::new(user_id, username), tx).unwrap();
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Authenticated { .. })));
        (conn, rx)
    }

    #[test]
    fn test_publish_roster_to_everyone() {
        let hub = Hub::new();
        let presence = PresenceBroadcaster::new(hub.clone());
        let (_a, mut alice_rx) = join(&hub, "u1", "alice");
        let (_b, mut bob_rx) = join(&hub, "u2", "bob");

        presence.publish_roster();

        let expected = ServerEvent::RosterUpdate {
            users: vec![Identity::new("u1", "alice"), Identity::new("u2", "bob")],
        };
        assert_eq!(alice_rx.try_recv().unwrap(), expected);
        assert_eq!(bob_rx.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_publish_typing() {
        let hub = Hub::new();
        let presence = PresenceBroadcaster::new(hub.clone());
        let (alice, mut alice_rx) = join(&hub, "u1", "alice");

        hub.set_typing(alice, true).unwrap();
        presence.publish_typing();

        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::TypingUsersUpdate {
                usernames: vec!["alice".to_string()]
            }
        );
    }

    #[test]
    fn test_send_roster_to_one_connection() {
        let hub = Hub::new();
        let presence = PresenceBroadcaster::new(hub.clone());
        let (alice, mut alice_rx) = join(&hub, "u1", "alice");
        let (_b, mut bob_rx) = join(&hub, "u2", "bob");

        presence.send_roster_to(&alice);

        assert!(matches!(alice_rx.try_recv(), Ok(ServerEvent::RosterUpdate { .. })));
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_announce_leave_after_removal_skips_leaver() {
        let hub = Hub::new();
        let presence = PresenceBroadcaster::new(hub.clone());
        let (alice, mut alice_rx) = join(&hub, "u1", "alice");
        let (_b, mut bob_rx) = join(&hub, "u2", "bob");

        let departure = hub.remove(&alice).unwrap();
        presence.announce_leave(&departure.identity);

        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::user_left(&Identity::new("u1", "alice"))
        );
        assert!(alice_rx.try_recv().is_err());
    }
}
