//! Connection lifecycle: Pending until a token is verified, Active while
//! admitted to the hub, Closed once the transport is gone.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthError, Identity, IdentityService};
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::hub::Hub;
use crate::relay::presence::PresenceBroadcaster;
use crate::relay::router::{DeliveryReceipt, MessageRouter};
use crate::relay::types::{ClientEvent, ConnectionId, Outbound, ServerEvent};
use crate::storage::{MessageStore, UserId, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Active,
    Closed,
}

/// One transport session as seen by the relay core
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    identity: Option<Identity>,
    outbound: Outbound,
    opened_at: DateTime<Utc>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Push an event to this connection only. Returns false if the transport is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outbound.send(event).is_ok()
    }
}

/// Drives connections through their states and wires each transition to the
/// hub, the router, presence and the user store
#[derive(Clone)]
pub struct LifecycleController {
    hub: Hub,
    identity: Arc<dyn IdentityService>,
    users: Arc<dyn UserStore>,
    router: MessageRouter,
    presence: PresenceBroadcaster,
    auth_timeout: Option<Duration>,
}

impl LifecycleController {
    pub fn new(
        hub: Hub,
        identity: Arc<dyn IdentityService>,
        users: Arc<dyn UserStore>,
        messages: Arc<dyn MessageStore>,
        auth_timeout: Option<Duration>,
    ) -> Self {
        Self {
            router: MessageRouter::new(hub.clone(), messages),
            presence: PresenceBroadcaster::new(hub.clone()),
            hub,
            identity,
            users,
            auth_timeout,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn auth_timeout(&self) -> Option<Duration> {
        self.auth_timeout
    }

    /// Open a new Pending connection
    pub fn connect(&self, outbound: Outbound) -> Connection {
        let connection = Connection {
            id: Uuid::new_v4(),
            state: ConnectionState::Pending,
            identity: None,
            outbound,
            opened_at: Utc::now(),
        };
        debug!(connection_id = %connection.id, "Connection opened");
        connection
    }

    /// Verify a token and make the connection Active.
    ///
    /// On failure the connection stays Pending and may retry.
    pub async fn authenticate(&self, conn: &mut Connection, token: &str) -> RelayResult<Identity> {
        if conn.state == ConnectionState::Closed {
            return Err(RelayError::NotAuthenticated);
        }

        let identity = self.verify(token).await?;

        if conn.state == ConnectionState::Active {
            if conn.identity.as_ref() != Some(&identity) {
                return Err(RelayError::AlreadyActive);
            }
            self.presence.send_roster_to(&conn.id);
            return Ok(identity);
        }

        self.hub
            .admit(conn.id, identity.clone(), conn.outbound.clone())?;
        conn.state = ConnectionState::Active;
        conn.identity = Some(identity.clone());

        info!(
            connection_id = %conn.id,
            user_id = %identity.user_id,
            username = %identity.username,
            "Connection authenticated"
        );

        self.mark_online(&identity.user_id, true, None).await;
        self.presence.announce_join(&identity);
        self.presence.publish_roster();

        Ok(identity)
    }

    pub async fn send_broadcast(&self, conn: &Connection, content: String) -> RelayResult<DeliveryReceipt> {
        if conn.state != ConnectionState::Active {
            return Err(RelayError::NotAuthenticated);
        }
        self.router.route_broadcast(conn.id, content).await
    }

    pub async fn send_direct(
        &self,
        conn: &Connection,
        recipient_id: UserId,
        content: String,
    ) -> RelayResult<DeliveryReceipt> {
        if conn.state != ConnectionState::Active {
            return Err(RelayError::NotAuthenticated);
        }
        self.router.route_direct(conn.id, recipient_id, content).await
    }

    /// Update the typing indicator; everyone hears about it only when it changes
    pub fn set_typing(&self, conn: &Connection, is_typing: bool) -> RelayResult<()> {
        if conn.state != ConnectionState::Active {
            return Err(RelayError::NotAuthenticated);
        }
        if self.hub.set_typing(conn.id, is_typing)? {
            self.presence.publish_typing();
        }
        Ok(())
    }

    /// Close a connection and run its cleanup. Returns false if it was already closed.
    pub async fn disconnect(&self, conn: &mut Connection) -> bool {
        let previous = conn.state;
        if previous == ConnectionState::Closed {
            return false;
        }
        conn.state = ConnectionState::Closed;

        if previous == ConnectionState::Pending {
            debug!(connection_id = %conn.id, "Pending connection closed");
            return true;
        }

        let Some(departure) = self.hub.remove(&conn.id) else {
            return true;
        };
        let identity = &departure.identity;

        info!(
            connection_id = %conn.id,
            user_id = %identity.user_id,
            duration_secs = (Utc::now() - conn.opened_at).num_seconds(),
            "Connection closed"
        );

        if !departure.user_still_online {
            self.mark_online(&identity.user_id, false, Some(Utc::now()))
                .await;
        }

        self.presence.announce_leave(identity);
        self.presence.publish_roster();
        if departure.was_typing {
            self.presence.publish_typing();
        }

        true
    }

    /// Dispatch one inbound client event, reporting failures to the originating connection
    pub async fn handle_event(&self, conn: &mut Connection, event: ClientEvent) {
        if conn.state == ConnectionState::Closed {
            return;
        }

        let result = match event {
            ClientEvent::Authenticate { token } => self.authenticate(conn, &token).await.map(|_| ()),
            ClientEvent::SendMessage { content } => self.send_broadcast(conn, content).await.map(|_| ()),
            ClientEvent::SendDirectMessage {
                recipient_id,
                content,
            } => self
                .send_direct(conn, recipient_id, content)
                .await
                .map(|_| ()),
            ClientEvent::Typing { is_typing } => match self.set_typing(conn, is_typing) {
                Err(RelayError::NotAuthenticated) => {
                    debug!(connection_id = %conn.id, "Ignoring typing from unauthenticated connection");
                    Ok(())
                }
                other => other,
            },
        };

        if let Err(e) = result {
            debug!(connection_id = %conn.id, code = e.code(), "Request failed: {}", e);
            conn.send(e.to_event());
        }
    }

    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        match self.auth_timeout {
            Some(limit) => tokio::time::timeout(limit, self.identity.verify_token(token))
                .await
                .map_err(|_| AuthError::Timeout)?,
            None => self.identity.verify_token(token).await,
        }
    }

    async fn mark_online(&self, user_id: &UserId, online: bool, last_seen: Option<DateTime<Utc>>) {
        if let Err(e) = self.users.set_user_online(user_id, online, last_seen).await {
            warn!(user_id = %user_id, "Failed to update online status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CreateUser, MemoryStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct StaticIdentity {
        tokens: HashMap<String, Identity>,
    }

    #[async_trait]
    impl IdentityService for StaticIdentity {
        async fn verify_token(&self, token: &str) -> Result<Identity, AuthError> {
            self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
        }

        async fn issue_token(&self, _user_id: &UserId) -> Result<String, AuthError> {
            Err(AuthError::Unavailable)
        }
    }

    struct SlowIdentity;

    #[async_trait]
    impl IdentityService for SlowIdentity {
        async fn verify_token(&self, _token: &str) -> Result<Identity, AuthError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(AuthError::InvalidToken)
        }

        async fn issue_token(&self, _user_id: &UserId) -> Result<String, AuthError> {
            Err(AuthError::InvalidToken)
        }
    }

    struct Fixture {
        controller: LifecycleController,
        store: MemoryStore,
        alice: UserId,
        bob: UserId,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let alice = create(&store, "alice").await;
        let bob = create(&store, "bob").await;

        let mut tokens = HashMap::new();
        tokens.insert("alice-token".to_string(), Identity::new(alice.clone(), "alice"));
        tokens.insert("bob-token".to_string(), Identity::new(bob.clone(), "bob"));

        let controller = LifecycleController::new(
            Hub::new(),
            Arc::new(StaticIdentity { tokens }),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            None,
        );

        Fixture {
            controller,
            store,
            alice,
            bob,
        }
    }

    async fn create(store: &MemoryStore, username: &str) -> UserId {
        store
            .create_user(CreateUser {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    fn open(controller: &LifecycleController) -> (Connection, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (controller.connect(tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_authenticate_activates_and_announces() {
        let f = fixture().await;
        let (mut conn, mut rx) = open(&f.controller);
        assert_eq!(conn.state(), ConnectionState::Pending);

        let identity = f
            .controller
            .authenticate(&mut conn, "alice-token")
            .await
            .unwrap();

        assert_eq!(identity.username, "alice");
        assert_eq!(conn.state(), ConnectionState::Active);
        assert!(f.store.get_user(&f.alice).await.unwrap().is_online);

        let events = drain(&mut rx);
        assert_eq!(events[0], ServerEvent::authenticated(&identity));
        assert_eq!(events[1], ServerEvent::user_joined(&identity));
        assert_eq!(
            events[2],
            ServerEvent::RosterUpdate {
                users: vec![identity.clone()]
            }
        );
    }

    #[tokio::test]
    async fn test_bad_token_stays_pending() {
        let f = fixture().await;
        let (mut conn, mut rx) = open(&f.controller);

        f.controller
            .handle_event(
                &mut conn,
                ClientEvent::Authenticate {
                    token: "nope".to_string(),
                },
            )
            .await;

        assert_eq!(conn.state(), ConnectionState::Pending);
        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::AuthError {
                reason: "Invalid authentication".to_string()
            }]
        );
        assert_eq!(f.controller.hub().connection_count(), 0);

        // Retry succeeds on the same connection
        f.controller
            .authenticate(&mut conn, "alice-token")
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_reauthenticate_same_identity_resends_roster_only() {
        let f = fixture().await;
        let (mut alice, mut alice_rx) = open(&f.controller);
        let (mut bob, mut bob_rx) = open(&f.controller);
        f.controller.authenticate(&mut alice, "alice-token").await.unwrap();
        f.controller.authenticate(&mut bob, "bob-token").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        f.controller.authenticate(&mut alice, "alice-token").await.unwrap();

        let events = drain(&mut alice_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::RosterUpdate { .. }));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_reauthenticate_different_identity_rejected() {
        let f = fixture().await;
        let (mut conn, _rx) = open(&f.controller);
        f.controller.authenticate(&mut conn, "alice-token").await.unwrap();

        let err = f
            .controller
            .authenticate(&mut conn, "bob-token")
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::AlreadyActive));
        assert_eq!(conn.identity().unwrap().user_id, f.alice);
    }

    #[tokio::test]
    async fn test_verify_timeout() {
        let controller = LifecycleController::new(
            Hub::new(),
            Arc::new(SlowIdentity),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Some(Duration::from_millis(20)),
        );
        let (mut conn, _rx) = open(&controller);

        let err = controller.authenticate(&mut conn, "any").await.unwrap_err();

        assert!(matches!(err, RelayError::Auth(AuthError::Timeout)));
        assert_eq!(conn.state(), ConnectionState::Pending);
    }

    #[tokio::test]
    async fn test_pending_cannot_send_or_type() {
        let f = fixture().await;
        let (mut conn, mut rx) = open(&f.controller);

        f.controller
            .handle_event(
                &mut conn,
                ClientEvent::SendMessage {
                    content: "hi".to_string(),
                },
            )
            .await;
        f.controller
            .handle_event(&mut conn, ClientEvent::Typing { is_typing: true })
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::OperationError { code, .. } => assert_eq!(code, "NOT_AUTHENTICATED"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(f.store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_typing_publishes_only_on_change() {
        let f = fixture().await;
        let (mut alice, mut alice_rx) = open(&f.controller);
        f.controller.authenticate(&mut alice, "alice-token").await.unwrap();
        drain(&mut alice_rx);

        f.controller.set_typing(&alice, true).unwrap();
        f.controller.set_typing(&alice, true).unwrap();

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::TypingUsersUpdate {
                usernames: vec!["alice".to_string()]
            }]
        );
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_once() {
        let f = fixture().await;
        let (mut alice, _alice_rx) = open(&f.controller);
        let (mut bob, mut bob_rx) = open(&f.controller);
        f.controller.authenticate(&mut alice, "alice-token").await.unwrap();
        f.controller.authenticate(&mut bob, "bob-token").await.unwrap();
        f.controller.set_typing(&alice, true).unwrap();
        drain(&mut bob_rx);

        assert!(f.controller.disconnect(&mut alice).await);
        assert!(!f.controller.disconnect(&mut alice).await);

        let alice_identity = Identity::new(f.alice.clone(), "alice");
        assert_eq!(
            drain(&mut bob_rx),
            vec![
                ServerEvent::user_left(&alice_identity),
                ServerEvent::RosterUpdate {
                    users: vec![Identity::new(f.bob.clone(), "bob")]
                },
                ServerEvent::TypingUsersUpdate { usernames: vec![] },
            ]
        );

        let stored = f.store.get_user(&f.alice).await.unwrap();
        assert!(!stored.is_online);
        assert!(stored.last_seen.is_some());
        assert_eq!(alice.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_user_online_with_other_device() {
        let f = fixture().await;
        let (mut phone, _phone_rx) = open(&f.controller);
        let (mut laptop, mut laptop_rx) = open(&f.controller);
        f.controller.authenticate(&mut phone, "alice-token").await.unwrap();
        f.controller.authenticate(&mut laptop, "alice-token").await.unwrap();
        drain(&mut laptop_rx);

        f.controller.disconnect(&mut phone).await;

        assert!(f.store.get_user(&f.alice).await.unwrap().is_online);
        let events = drain(&mut laptop_rx);
        assert!(matches!(events[0], ServerEvent::UserLeft { .. }));
        assert_eq!(
            events[1],
            ServerEvent::RosterUpdate {
                users: vec![Identity::new(f.alice.clone(), "alice")]
            }
        );
    }

    #[tokio::test]
    async fn test_pending_disconnect_has_no_side_effects() {
        let f = fixture().await;
        let (_bob, mut bob_rx) = {
            let (mut bob, rx) = open(&f.controller);
            f.controller.authenticate(&mut bob, "bob-token").await.unwrap();
            (bob, rx)
        };
        drain(&mut bob_rx);

        let (mut pending, _rx) = open(&f.controller);
        assert!(f.controller.disconnect(&mut pending).await);

        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(pending.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_events_after_close_are_ignored() {
        let f = fixture().await;
        let (mut conn, mut rx) = open(&f.controller);
        f.controller.disconnect(&mut conn).await;

        f.controller
            .handle_event(
                &mut conn,
                ClientEvent::Authenticate {
                    token: "alice-token".to_string(),
                },
            )
            .await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(f.controller.hub().connection_count(), 0);
    }
}
