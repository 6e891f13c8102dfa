use crate::storage::traits::{MessageStore, StorageResult};
use crate::storage::types::{Message, MessageFilter, NewMessage};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

/// PostgreSQL implementation of MessageStore
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize database schema
    pub async fn initialize(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id UUID PRIMARY KEY,
                content TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                is_private BOOLEAN NOT NULL DEFAULT FALSE,
                recipient_id TEXT,
                timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_public_timestamp
                ON messages(timestamp DESC) WHERE is_private = FALSE
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_private_participants
                ON messages(sender_id, recipient_id) WHERE is_private = TRUE
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn message_from_row(row: &PgRow) -> Message {
    Message {
        id: row.get("id"),
        content: row.get("content"),
        sender_id: row.get("sender_id"),
        sender_name: row.get("sender_name"),
        is_private: row.get("is_private"),
        recipient_id: row.get("recipient_id"),
        timestamp: row.get("timestamp"),
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn save_message(&self, message: NewMessage) -> StorageResult<Message> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, content, sender_id, sender_name, is_private, recipient_id, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&message.content)
        .bind(&message.sender_id)
        .bind(&message.sender_name)
        .bind(message.is_private())
        .bind(&message.recipient_id)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(message.into_message(id))
    }

    async fn find_messages(&self, filter: MessageFilter, limit: i64) -> StorageResult<Vec<Message>> {
        let rows = match filter {
            MessageFilter::Public => {
                sqlx::query(
                    r#"
                    SELECT id, content, sender_id, sender_name, is_private, recipient_id, timestamp
                    FROM messages
                    WHERE is_private = FALSE
                    ORDER BY timestamp DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            MessageFilter::PrivateFor(user_id) => {
                sqlx::query(
                    r#"
                    SELECT id, content, sender_id, sender_name, is_private, recipient_id, timestamp
                    FROM messages
                    WHERE is_private = TRUE AND (sender_id = $1 OR recipient_id = $1)
                    ORDER BY timestamp DESC
                    LIMIT $2
                    "#,
                )
                .bind(&user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(message_from_row).collect())
    }
}
