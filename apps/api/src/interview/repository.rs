//! SQLite persistence for conversations and their transcripts.
//!
//! The state blob and the appended messages are written in one transaction:
//! a turn is either fully stored or not stored at all.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::interview::models::{Conversation, InterviewState, Message, Role};

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    template_id: Option<String>,
    state: Json<InterviewState>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, sqlx::Error> {
        let id = Uuid::parse_str(&self.id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let role: Role = self.role.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        Ok(Message {
            id,
            role,
            content: self.content,
            timestamp: self.created_at,
        })
    }
}

/// Listing entry for the conversations index.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ConversationSummary {
    pub id: String,
    pub stage: String,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

/// Loads a conversation with its full transcript, oldest message first.
pub async fn get_conversation(pool: &SqlitePool, id: Uuid) -> Result<Option<Conversation>, sqlx::Error> {
    let row: Option<ConversationRow> = sqlx::query_as(
        "SELECT id, template_id, state, created_at, updated_at FROM conversations WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let messages: Vec<MessageRow> = sqlx::query_as(
        "SELECT id, role, content, created_at FROM messages WHERE conversation_id = ? ORDER BY seq",
    )
    .bind(&row.id)
    .fetch_all(pool)
    .await?;

    let messages = messages
        .into_iter()
        .map(MessageRow::into_message)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Conversation {
        id: Uuid::parse_str(&row.id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        template_id: row.template_id,
        state: row.state.0,
        messages,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

/// Inserts or updates the conversation state and appends `messages` after the
/// existing transcript, atomically.
pub async fn upsert_conversation(
    pool: &SqlitePool,
    id: Uuid,
    template_id: Option<&str>,
    state: &InterviewState,
    messages: &[Message],
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    let id = id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO conversations (id, template_id, state, stage, completed, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            state = excluded.state,
            stage = excluded.stage,
            completed = excluded.completed,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&id)
    .bind(template_id)
    .bind(Json(state))
    .bind(state.stage.as_str())
    .bind(state.completed)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let last_seq: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM messages WHERE conversation_id = ?")
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;

    for (offset, message) in messages.iter().enumerate() {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(&id)
        .bind(last_seq + offset as i64 + 1)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.timestamp)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!("Stored conversation {id} at stage {} (+{} messages)", state.stage, messages.len());
    Ok(())
}

/// Deletes a conversation and, by cascade, its transcript. Returns whether it existed.
pub async fn delete_conversation(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Most recently updated conversations first.
pub async fn list_conversations(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<ConversationSummary>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, stage, completed, updated_at FROM conversations ORDER BY updated_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
