//! Conversation transcript database operations
//!
//! One row per (session, step). Appends are read-then-append inside a
//! transaction so entries for a given step stay strictly ordered; a single
//! authenticated user drives one session at a time, so no cross-writer
//! coordination is needed beyond that.

use chrono::Utc;
use orrery_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::models::ConversationEntry;

fn parse_messages(raw: &str) -> Result<Vec<ConversationEntry>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Failed to deserialize messages: {}", e)))
}

fn serialize_messages(messages: &[ConversationEntry]) -> Result<String> {
    serde_json::to_string(messages)
        .map_err(|e| Error::Internal(format!("Failed to serialize messages: {}", e)))
}

/// Append entries to a step's conversation inside an existing transaction
pub async fn append_messages_tx(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: Uuid,
    step_number: u32,
    entries: &[ConversationEntry],
) -> Result<()> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT messages FROM conversations WHERE session_id = ? AND step_number = ?",
    )
    .bind(session_id.to_string())
    .bind(step_number as i64)
    .fetch_optional(&mut **tx)
    .await?;

    let mut messages = match existing {
        Some(raw) => parse_messages(&raw)?,
        None => Vec::new(),
    };
    messages.extend_from_slice(entries);

    let serialized = serialize_messages(&messages)?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO conversations (id, session_id, step_number, messages, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id, step_number) DO UPDATE SET
            messages = excluded.messages,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(session_id.to_string())
    .bind(step_number as i64)
    .bind(serialized)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Append entries to a step's conversation
pub async fn append_messages(
    pool: &SqlitePool,
    session_id: Uuid,
    step_number: u32,
    entries: &[ConversationEntry],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    append_messages_tx(&mut tx, session_id, step_number, entries).await?;
    tx.commit().await?;
    Ok(())
}

/// Load one step's conversation (empty when none recorded)
pub async fn load_conversation(
    pool: &SqlitePool,
    session_id: Uuid,
    step_number: u32,
) -> Result<Vec<ConversationEntry>> {
    let raw: Option<String> = sqlx::query_scalar(
        "SELECT messages FROM conversations WHERE session_id = ? AND step_number = ?",
    )
    .bind(session_id.to_string())
    .bind(step_number as i64)
    .fetch_optional(pool)
    .await?;

    match raw {
        Some(raw) => parse_messages(&raw),
        None => Ok(Vec::new()),
    }
}

/// Whether the step already has the user's primary answer on record
pub async fn has_main_response(
    pool: &SqlitePool,
    session_id: Uuid,
    step_number: u32,
) -> Result<bool> {
    let messages = load_conversation(pool, session_id, step_number).await?;
    Ok(messages.iter().any(|m| m.is_main_response()))
}

/// Load the full transcript ordered by step number
pub async fn load_transcript(
    pool: &SqlitePool,
    session_id: Uuid,
) -> Result<Vec<(u32, Vec<ConversationEntry>)>> {
    let rows = sqlx::query(
        r#"
        SELECT step_number, messages
        FROM conversations
        WHERE session_id = ?
        ORDER BY step_number ASC
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut transcript = Vec::with_capacity(rows.len());
    for row in rows {
        let step_number: i64 = row.get("step_number");
        let raw: String = row.get("messages");
        transcript.push((step_number as u32, parse_messages(&raw)?));
    }

    Ok(transcript)
}
