use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::auth::identity::AuthError;
use crate::storage::UserId;

/// Generate a secure random session token (64 hex characters)
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Sessions are keyed by token digest so raw tokens never sit in memory
fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

struct ActiveSession {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

/// In-memory session manager for issued tokens
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, ActiveSession>>>,
    timeout_seconds: u64,
}

impl SessionManager {
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timeout_seconds,
        }
    }

    /// Create a new session, returning its token
    pub fn create_session(&self, user_id: UserId) -> String {
        let token = generate_session_token();
        let expires_at = Utc::now() + Duration::seconds(self.timeout_seconds as i64);

        self.sessions.write().insert(
            token_digest(&token),
            ActiveSession {
                user_id,
                expires_at,
            },
        );

        token
    }

    /// Validate a session token and return its user
    pub fn validate_token(&self, token: &str) -> Result<UserId, AuthError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(&token_digest(token))
            .ok_or(AuthError::InvalidToken)?;

        if Utc::now() < session.expires_at {
            Ok(session.user_id.clone())
        } else {
            Err(AuthError::ExpiredToken)
        }
    }

    /// Revoke a session
    pub fn revoke_session(&self, token: &str) -> bool {
        self.sessions.write().remove(&token_digest(token)).is_some()
    }

    /// Revoke all sessions for a user
    pub fn revoke_user_sessions(&self, user_id: &UserId) {
        self.sessions.write().retain(|_, session| session.user_id != *user_id);
    }

    /// Clean up expired sessions
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }
}

/// Per-IP limiter for failed authentication attempts over a sliding window
#[derive(Clone)]
pub struct AuthRateLimiter {
    failures: Arc<RwLock<HashMap<IpAddr, Vec<DateTime<Utc>>>>>,
    max_failures: usize,
    window: Duration,
}

impl AuthRateLimiter {
    pub fn new(max_failures: usize, window_seconds: i64) -> Self {
        Self {
            failures: Arc::new(RwLock::new(HashMap::new())),
            max_failures,
            window: Duration::seconds(window_seconds),
        }
    }

    /// Record a failed attempt. Returns true once the IP has hit the limit.
    pub fn record_failure(&self, ip: IpAddr) -> bool {
        let now = Utc::now();
        let cutoff = now - self.window;

        let mut failures = self.failures.write();
        let recent = failures.entry(ip).or_default();
        recent.retain(|at| *at > cutoff);
        recent.push(now);

        recent.len() >= self.max_failures
    }

    pub fn is_rate_limited(&self, ip: IpAddr) -> bool {
        let cutoff = Utc::now() - self.window;

        self.failures.read().get(&ip).is_some_and(|recent| {
            recent.iter().filter(|at| **at > cutoff).count() >= self.max_failures
        })
    }

    /// Forget an IP's failures after it authenticates
    pub fn clear(&self, ip: IpAddr) {
        self.failures.write().remove(&ip);
    }

    /// Drop IPs with no failures inside the window. Returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.window;

        let mut failures = self.failures.write();
        let before = failures.len();
        failures.retain(|_, recent| {
            recent.retain(|at| *at > cutoff);
            !recent.is_empty()
        });

        before - failures.len()
    }
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new(10, 60)
    }
}
