mod identity;
mod middleware;
mod password;
mod session;

pub use identity::{AuthError, Identity, IdentityService, SessionIdentityService};
pub use middleware::{auth_middleware, bearer_token, rate_limited_response, AuthState, AuthUser};
pub use password::{hash_password, verify_password, PasswordError, MIN_PASSWORD_LENGTH};
pub use session::{generate_session_token, AuthRateLimiter, SessionManager};
