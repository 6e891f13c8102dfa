use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::traits::{StorageError, StorageResult};
use super::types::{UserFilter, UserId};

/// Column width of `users.username`, in characters
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Column width of `users.email`, in characters
pub const MAX_EMAIL_LENGTH: usize = 255;

/// User account in the system
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    /// Best-effort mirror of registry presence; may be briefly stale
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// User creation request
#[derive(Debug)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// User store trait
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a new user
    async fn create_user(&self, user: CreateUser) -> StorageResult<User>;

    /// Get user by ID
    async fn get_user(&self, id: &UserId) -> StorageResult<User>;

    /// Get user by email
    async fn get_user_by_email(&self, email: &str) -> StorageResult<User>;

    /// Get user by username
    async fn get_user_by_username(&self, username: &str) -> StorageResult<User>;

    /// List users matching a filter
    async fn find_users(&self, filter: UserFilter) -> StorageResult<Vec<User>>;

    /// Mirror a user's online flag, optionally stamping last_seen
    async fn set_user_online(
        &self,
        id: &UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    /// Delete user
    async fn delete_user(&self, id: &UserId) -> StorageResult<()>;
}

/// PostgreSQL implementation of UserStore
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize database schema for users
    pub async fn initialize(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username VARCHAR(64) UNIQUE NOT NULL,
                email VARCHAR(255) UNIQUE NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                is_online BOOLEAN NOT NULL DEFAULT FALSE,
                last_seen TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_one_by(&self, column: &'static str, value: &str) -> StorageResult<User> {
        let query = format!(
            "SELECT id, username, email, password_hash, is_online, last_seen, created_at \
             FROM users WHERE {} = $1",
            column
        );

        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::UserNotFound(value.to_string()))?;

        Ok(user_from_row(&row))
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_online: row.get("is_online"),
        last_seen: row.get("last_seen"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn create_user(&self, user: CreateUser) -> StorageResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, is_online, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            "#,
        )
        .bind(&id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return StorageError::DuplicateUser(user.username.clone());
                }
            }
            StorageError::Database(e)
        })?;

        Ok(User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_online: false,
            last_seen: None,
            created_at: now,
        })
    }

    async fn get_user(&self, id: &UserId) -> StorageResult<User> {
        self.fetch_one_by("id", id).await
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<User> {
        self.fetch_one_by("email", email).await
    }

    async fn get_user_by_username(&self, username: &str) -> StorageResult<User> {
        self.fetch_one_by("username", username).await
    }

    async fn find_users(&self, filter: UserFilter) -> StorageResult<Vec<User>> {
        let query = match filter {
            UserFilter::All => {
                r#"
                SELECT id, username, email, password_hash, is_online, last_seen, created_at
                FROM users
                ORDER BY created_at ASC
                "#
            }
            UserFilter::Online => {
                r#"
                SELECT id, username, email, password_hash, is_online, last_seen, created_at
                FROM users
                WHERE is_online = TRUE
                ORDER BY created_at ASC
                "#
            }
        };

        let rows = sqlx::query(query).fetch_all(&self.pool).await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn set_user_online(
        &self,
        id: &UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_online = $2, last_seen = COALESCE($3, last_seen)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(is_online)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UserNotFound(id.clone()));
        }

        Ok(())
    }

    async fn delete_user(&self, id: &UserId) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM users WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UserNotFound(id.clone()));
        }

        Ok(())
    }
}
