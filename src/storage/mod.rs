mod memory;
mod postgres;
mod traits;
mod types;
mod users;

pub use memory::MemoryStore;
pub use postgres::PostgresMessageStore;
pub use traits::{MessageStore, StorageError, StorageResult};
pub use types::*;
pub use users::{CreateUser, PostgresUserStore, User, UserStore, MAX_EMAIL_LENGTH, MAX_USERNAME_LENGTH};
