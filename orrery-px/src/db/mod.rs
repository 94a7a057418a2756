//! Database access for orrery-px

pub mod conversations;
pub mod documents;
pub mod prompts;
pub mod sessions;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to orrery.db in the root folder, creating it if missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize orrery-px tables
///
/// Creates product_sessions, uploaded_documents, conversations and prompts
/// tables if they don't exist.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            product_slug TEXT NOT NULL,
            current_step INTEGER NOT NULL DEFAULT 1,
            current_section INTEGER NOT NULL DEFAULT 1,
            placements TEXT,
            placements_confirmed INTEGER NOT NULL DEFAULT 0,
            followup_counts TEXT NOT NULL DEFAULT '{}',
            step_data TEXT NOT NULL DEFAULT '{}',
            deliverable_content TEXT,
            deliverable_generated_at TEXT,
            is_complete INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            last_activity_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, product_slug)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS uploaded_documents (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            step_number INTEGER NOT NULL DEFAULT 1,
            file_name TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            step_number INTEGER NOT NULL,
            messages TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(session_id, step_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompts (
            id TEXT PRIMARY KEY,
            product_slug TEXT NOT NULL,
            scope TEXT NOT NULL,
            content TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (product_sessions, uploaded_documents, conversations, prompts)"
    );

    Ok(())
}
