use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthState, SessionIdentityService, SessionManager};
use crate::config::ServerConfig;
use crate::relay::{Hub, LifecycleController, RelayState};
use crate::storage::{MessageStore, UserStore};

/// Main server state shared across all handlers
pub struct ServerState {
    pub config: ServerConfig,
    pub hub: Hub,
    pub controller: LifecycleController,
    pub user_store: Arc<dyn UserStore>,
    pub message_store: Arc<dyn MessageStore>,
    pub identity: SessionIdentityService,
    pub auth_state: Arc<AuthState>,
    pub start_time: Instant,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        user_store: Arc<dyn UserStore>,
        message_store: Arc<dyn MessageStore>,
    ) -> Self {
        let session_manager = SessionManager::new(config.session_timeout_seconds);
        let auth_state = Arc::new(AuthState::new(session_manager.clone()));
        let identity = SessionIdentityService::new(session_manager, user_store.clone());

        let hub = Hub::new();
        let controller = LifecycleController::new(
            hub.clone(),
            Arc::new(identity.clone()),
            user_store.clone(),
            message_store.clone(),
            config.auth_timeout(),
        );

        Self {
            config,
            hub,
            controller,
            user_store,
            message_store,
            identity,
            auth_state,
            start_time: Instant::now(),
        }
    }

    /// State for the WebSocket route
    pub fn relay_state(&self) -> RelayState {
        RelayState {
            controller: self.controller.clone(),
            ping_interval: self.config.ping_interval(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
