mod auth;
mod health;
mod history;

pub use auth::*;
pub use health::*;
pub use history::*;
