pub mod auth;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod relay;
pub mod state;
pub mod storage;

pub use config::ServerConfig;
pub use relay::{Hub, LifecycleController};
pub use state::ServerState;
