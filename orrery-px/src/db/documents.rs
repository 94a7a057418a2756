//! Uploaded document index operations

use chrono::{DateTime, Utc};
use orrery_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::models::UploadedDocument;

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<UploadedDocument> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let session_id: String = row.get("session_id");
    let created_at: String = row.get("created_at");

    Ok(UploadedDocument {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Failed to parse document id: {}", e)))?,
        user_id: Uuid::parse_str(&user_id)
            .map_err(|e| Error::Internal(format!("Failed to parse user_id: {}", e)))?,
        session_id: Uuid::parse_str(&session_id)
            .map_err(|e| Error::Internal(format!("Failed to parse session_id: {}", e)))?,
        step_number: row.get::<i64, _>("step_number") as u32,
        file_name: row.get("file_name"),
        storage_path: row.get("storage_path"),
        file_type: row.get("file_type"),
        file_size: row.get("file_size"),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
            .with_timezone(&Utc),
    })
}

/// Insert a document index row inside an existing transaction
pub async fn insert_document_tx(
    tx: &mut Transaction<'_, Sqlite>,
    document: &UploadedDocument,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO uploaded_documents (
            id, user_id, session_id, step_number,
            file_name, storage_path, file_type, file_size, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(document.id.to_string())
    .bind(document.user_id.to_string())
    .bind(document.session_id.to_string())
    .bind(document.step_number as i64)
    .bind(&document.file_name)
    .bind(&document.storage_path)
    .bind(&document.file_type)
    .bind(document.file_size)
    .bind(document.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// List a session's documents, oldest first
pub async fn list_documents(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<UploadedDocument>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, session_id, step_number,
               file_name, storage_path, file_type, file_size, created_at
        FROM uploaded_documents
        WHERE session_id = ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_document).collect()
}

/// Count a session's documents
pub async fn count_documents(pool: &SqlitePool, session_id: Uuid) -> Result<usize> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM uploaded_documents WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(pool)
            .await?;

    Ok(count as usize)
}

/// Storage paths for a session's documents (extraction input)
pub async fn storage_paths(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<String>> {
    let paths: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT storage_path FROM uploaded_documents
        WHERE session_id = ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(paths)
}

/// Find one document within a session
pub async fn find_document(
    pool: &SqlitePool,
    session_id: Uuid,
    document_id: Uuid,
) -> Result<Option<UploadedDocument>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, session_id, step_number,
               file_name, storage_path, file_type, file_size, created_at
        FROM uploaded_documents
        WHERE id = ? AND session_id = ?
        "#,
    )
    .bind(document_id.to_string())
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_document).transpose()
}

/// Delete one document's index row
pub async fn delete_document(pool: &SqlitePool, session_id: Uuid, document_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM uploaded_documents WHERE id = ? AND session_id = ?")
        .bind(document_id.to_string())
        .bind(session_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
