//! SQLite message store implementation.
//!
//! Implements `MessageStore` from `chatline-core` using sqlx with split
//! read/write pools. Rows are append-only; nothing updates or deletes them.

use chatline_core::repository::MessageStore;
use chatline_types::chat::{ChatMessage, NewMessage, Sender};
use chatline_types::error::StoreError;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `MessageStore`.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: DatabasePool,
}

impl SqliteMessageStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ChatMessageRow {
    id: String,
    session_id: String,
    sender: String,
    text: String,
    created_at: String,
    timezone: Option<String>,
}

impl ChatMessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            sender: row.try_get("sender")?,
            text: row.try_get("text")?,
            created_at: row.try_get("created_at")?,
            timezone: row.try_get("timezone")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Corrupt(format!("invalid message id: {e}")))?;
        let sender: Sender = self.sender.parse().map_err(StoreError::Corrupt)?;
        let timestamp = parse_datetime(&self.created_at)?;

        Ok(ChatMessage {
            id,
            session_id: self.session_id,
            sender,
            text: self.text,
            timestamp,
            timezone: self.timezone,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid datetime: {e}")))
}

/// Fixed-width so that string order in SQLite equals chronological order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn map_query_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// MessageStore implementation
// ---------------------------------------------------------------------------

impl MessageStore for SqliteMessageStore {
    async fn append(&self, message: &NewMessage) -> Result<ChatMessage, StoreError> {
        let stored = ChatMessage {
            id: Uuid::now_v7(),
            session_id: message.session_id.clone(),
            sender: message.sender,
            text: message.text.clone(),
            // Stored with microsecond precision; truncate so the returned
            // value equals what a later read produces.
            timestamp: Utc::now().trunc_subsecs(6),
            timezone: message.timezone.clone(),
        };

        sqlx::query(
            r#"INSERT INTO chat_messages (id, session_id, sender, text, created_at, timezone)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(stored.id.to_string())
        .bind(&stored.session_id)
        .bind(stored.sender.to_string())
        .bind(&stored.text)
        .bind(format_datetime(&stored.timestamp))
        .bind(&stored.timezone)
        .execute(&self.pool.writer)
        .await
        .map_err(map_query_error)?;

        debug!(
            session_id = %stored.session_id,
            message_id = %stored.id,
            sender = %stored.sender,
            "Message appended"
        );
        Ok(stored)
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, session_id, sender, text, created_at, timezone
               FROM chat_messages
               WHERE session_id = ?
               ORDER BY created_at ASC, seq ASC"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_query_error)?;

        rows.iter()
            .map(|row| {
                ChatMessageRow::from_row(row)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?
                    .into_message()
            })
            .collect()
    }

    async fn count_by_session(&self, session_id: &str) -> Result<u64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool.reader)
                .await
                .map_err(map_query_error)?;

        Ok(count as u64)
    }
}
