//! Product session database operations
//!
//! Every state transition writes through here before the service reports a
//! new state. All lookups are keyed `(id, user_id)` so a session is only
//! ever visible to its owner.

use chrono::{DateTime, Utc};
use orrery_common::{Error, PlacementStore, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::engine::{self, NormalizePatch};
use crate::models::{SessionRecord, StepAnswer};

const SESSION_COLUMNS: &str = "id, user_id, product_slug, current_step, current_section, \
     placements, placements_confirmed, followup_counts, step_data, \
     deliverable_content, deliverable_generated_at, is_complete, completed_at, \
     last_activity_at, created_at, updated_at";

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_uuid(field: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");

    let placements: Option<String> = row.get("placements");
    let placements: Option<PlacementStore> = placements
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| Error::Internal(format!("Failed to deserialize placements: {}", e)))
        })
        .transpose()?;

    let followup_counts: String = row.get("followup_counts");
    let followup_counts: BTreeMap<u32, u8> = serde_json::from_str(&followup_counts)
        .map_err(|e| Error::Internal(format!("Failed to deserialize followup_counts: {}", e)))?;

    let step_data: String = row.get("step_data");
    let step_data: BTreeMap<String, StepAnswer> = serde_json::from_str(&step_data)
        .map_err(|e| Error::Internal(format!("Failed to deserialize step_data: {}", e)))?;

    let deliverable_generated_at: Option<String> = row.get("deliverable_generated_at");
    let deliverable_generated_at = deliverable_generated_at
        .map(|raw| parse_timestamp("deliverable_generated_at", &raw))
        .transpose()?;

    let completed_at: Option<String> = row.get("completed_at");
    let completed_at = completed_at
        .map(|raw| parse_timestamp("completed_at", &raw))
        .transpose()?;

    let last_activity_at: String = row.get("last_activity_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(SessionRecord {
        id: parse_uuid("id", &id)?,
        user_id: parse_uuid("user_id", &user_id)?,
        product_slug: row.get("product_slug"),
        current_step: row.get::<i64, _>("current_step") as u32,
        current_section: row.get::<i64, _>("current_section") as u32,
        placements,
        placements_confirmed: row.get::<i64, _>("placements_confirmed") != 0,
        followup_counts,
        step_data,
        deliverable_content: row.get("deliverable_content"),
        deliverable_generated_at,
        is_complete: row.get::<i64, _>("is_complete") != 0,
        completed_at,
        last_activity_at: parse_timestamp("last_activity_at", &last_activity_at)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

/// Insert a fresh session row
pub async fn create_session(pool: &SqlitePool, session: &SessionRecord) -> Result<()> {
    let followup_counts = serde_json::to_string(&session.followup_counts)
        .map_err(|e| Error::Internal(format!("Failed to serialize followup_counts: {}", e)))?;
    let step_data = serde_json::to_string(&session.step_data)
        .map_err(|e| Error::Internal(format!("Failed to serialize step_data: {}", e)))?;
    let placements = session
        .placements
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize placements: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO product_sessions (
            id, user_id, product_slug, current_step, current_section,
            placements, placements_confirmed, followup_counts, step_data,
            deliverable_content, deliverable_generated_at, is_complete, completed_at,
            last_activity_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.id.to_string())
    .bind(session.user_id.to_string())
    .bind(&session.product_slug)
    .bind(session.current_step as i64)
    .bind(session.current_section as i64)
    .bind(placements)
    .bind(session.placements_confirmed as i64)
    .bind(followup_counts)
    .bind(step_data)
    .bind(&session.deliverable_content)
    .bind(session.deliverable_generated_at.map(|dt| dt.to_rfc3339()))
    .bind(session.is_complete as i64)
    .bind(session.completed_at.map(|dt| dt.to_rfc3339()))
    .bind(session.last_activity_at.to_rfc3339())
    .bind(session.created_at.to_rfc3339())
    .bind(session.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a session by id, enforcing row ownership
pub async fn load_session(
    pool: &SqlitePool,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM product_sessions WHERE id = ? AND user_id = ?",
        SESSION_COLUMNS
    ))
    .bind(session_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_session).transpose()
}

/// Find a user's session for a product (one per user per product)
pub async fn find_session_for_product(
    pool: &SqlitePool,
    user_id: Uuid,
    product_slug: &str,
) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM product_sessions WHERE user_id = ? AND product_slug = ?",
        SESSION_COLUMNS
    ))
    .bind(user_id.to_string())
    .bind(product_slug)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_session).transpose()
}

/// Load a session and run the guard pass on it.
///
/// A session past step 1 without confirmed, non-empty placements is
/// normalized back to step 1 and the patch is persisted immediately, so a
/// given anomaly is written exactly once: the next load observes a
/// consistent row and produces no further writes.
pub async fn load_session_normalized(
    pool: &SqlitePool,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<Option<SessionRecord>> {
    let Some(mut session) = load_session(pool, session_id, user_id).await? else {
        return Ok(None);
    };

    if let Some(patch) = engine::normalize(&session) {
        tracing::warn!(
            session_id = %session.id,
            current_step = session.current_step,
            placements_confirmed = session.placements_confirmed,
            "Normalizing inconsistent session back to step 1"
        );
        apply_normalize_patch(pool, &mut session, &patch).await?;
    }

    Ok(Some(session))
}

async fn apply_normalize_patch(
    pool: &SqlitePool,
    session: &mut SessionRecord,
    patch: &NormalizePatch,
) -> Result<()> {
    let now = Utc::now();

    if patch.clear_placements {
        sqlx::query(
            r#"
            UPDATE product_sessions
            SET current_step = ?, placements_confirmed = 0, placements = NULL, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(patch.current_step as i64)
        .bind(now.to_rfc3339())
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .execute(pool)
        .await?;
        session.placements = None;
    } else {
        sqlx::query(
            r#"
            UPDATE product_sessions
            SET current_step = ?, placements_confirmed = 0, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(patch.current_step as i64)
        .bind(now.to_rfc3339())
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .execute(pool)
        .await?;
    }

    session.current_step = patch.current_step;
    session.placements_confirmed = patch.placements_confirmed;
    session.updated_at = now;

    Ok(())
}

/// Atomic confirm-and-advance.
///
/// One transaction persists the confirmed placements, flips the confirmation
/// flag, moves the pointer to step 2, and clears the session's uploaded
/// documents so later steps never display stale uploads. Either all of it
/// lands or none of it does; confirmation is never assumed without the
/// write succeeding.
pub async fn confirm_and_advance(
    pool: &SqlitePool,
    session_id: Uuid,
    user_id: Uuid,
    placements: &PlacementStore,
) -> Result<()> {
    let serialized = serde_json::to_string(placements)
        .map_err(|e| Error::Internal(format!("Failed to serialize placements: {}", e)))?;
    let now = Utc::now().to_rfc3339();

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE product_sessions
        SET placements = ?, placements_confirmed = 1,
            current_step = 2, current_section = 1,
            last_activity_at = ?, updated_at = ?
        WHERE id = ? AND user_id = ? AND is_complete = 0
        "#,
    )
    .bind(&serialized)
    .bind(&now)
    .bind(&now)
    .bind(session_id.to_string())
    .bind(user_id.to_string())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Session not found: {}", session_id)));
    }

    sqlx::query("DELETE FROM uploaded_documents WHERE session_id = ?")
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(())
}

/// Persist a step pointer move (advance or go back)
pub async fn update_step_pointer(
    pool: &SqlitePool,
    session: &SessionRecord,
    new_step: u32,
) -> Result<()> {
    let followup_counts = serde_json::to_string(&session.followup_counts)
        .map_err(|e| Error::Internal(format!("Failed to serialize followup_counts: {}", e)))?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        UPDATE product_sessions
        SET current_step = ?, current_section = ?, followup_counts = ?,
            last_activity_at = ?, updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(new_step as i64)
    .bind(session.current_section as i64)
    .bind(followup_counts)
    .bind(&now)
    .bind(&now)
    .bind(session.id.to_string())
    .bind(session.user_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Force re-confirmation after a new upload (invariant B): the flag flips
/// false and the pointer returns to step 1 in the same statement, before the
/// caller makes the new document row visible.
pub async fn force_reconfirmation(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        UPDATE product_sessions
        SET placements_confirmed = 0, current_step = 1, updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(&now)
    .bind(session_id.to_string())
    .bind(user_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Record a step answer into the structured step_data map
pub async fn record_step_answer(
    pool: &SqlitePool,
    session: &SessionRecord,
    step: u32,
    answer: &str,
) -> Result<()> {
    let mut step_data = session.step_data.clone();
    step_data.insert(
        SessionRecord::step_key(step),
        StepAnswer {
            answer: answer.to_string(),
            completed_at: Utc::now(),
        },
    );
    let serialized = serde_json::to_string(&step_data)
        .map_err(|e| Error::Internal(format!("Failed to serialize step_data: {}", e)))?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        UPDATE product_sessions
        SET step_data = ?, last_activity_at = ?, updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(serialized)
    .bind(&now)
    .bind(&now)
    .bind(session.id.to_string())
    .bind(session.user_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Increment a step's follow-up count, refusing to exceed the cap
pub async fn increment_followup_count(
    pool: &SqlitePool,
    session: &SessionRecord,
    step: u32,
) -> Result<u8> {
    let current = session.followup_count(step);
    if current >= crate::engine::MAX_FOLLOWUPS {
        return Err(Error::InvalidInput(format!(
            "Follow-up limit reached for step {}",
            step
        )));
    }

    let mut counts = session.followup_counts.clone();
    counts.insert(step, current + 1);
    let serialized = serde_json::to_string(&counts)
        .map_err(|e| Error::Internal(format!("Failed to serialize followup_counts: {}", e)))?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        UPDATE product_sessions
        SET followup_counts = ?, last_activity_at = ?, updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(serialized)
    .bind(&now)
    .bind(&now)
    .bind(session.id.to_string())
    .bind(session.user_id.to_string())
    .execute(pool)
    .await?;

    Ok(current + 1)
}

/// Atomically persist the deliverable and mark the session complete.
///
/// The artifact, the generation timestamp, the completion flag, and the
/// step-999 transcript entry land in one transaction; a failed generation
/// never leaves a partial deliverable behind.
pub async fn store_deliverable(
    pool: &SqlitePool,
    session: &SessionRecord,
    deliverable: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = now.to_rfc3339();

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE product_sessions
        SET deliverable_content = ?, deliverable_generated_at = ?,
            is_complete = 1, completed_at = ?,
            last_activity_at = ?, updated_at = ?
        WHERE id = ? AND user_id = ? AND is_complete = 0
        "#,
    )
    .bind(deliverable)
    .bind(&now_str)
    .bind(&now_str)
    .bind(&now_str)
    .bind(&now_str)
    .bind(session.id.to_string())
    .bind(session.user_id.to_string())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "Session not found or already complete: {}",
            session.id
        )));
    }

    let entry = crate::models::ConversationEntry::assistant(
        deliverable,
        crate::models::MessageKind::FinalBriefing,
    );
    crate::db::conversations::append_messages_tx(
        &mut tx,
        session.id,
        crate::models::FINAL_BRIEFING_STEP,
        &[entry],
    )
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Reset a session back to the beginning.
///
/// Completion state and the deliverable are cleared and the pointer returns
/// to step 1 unconfirmed. Stored placements are kept so the user does not
/// have to re-upload charts.
pub async fn reset_session(pool: &SqlitePool, session_id: Uuid, user_id: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        UPDATE product_sessions
        SET is_complete = 0, completed_at = NULL,
            deliverable_content = NULL, deliverable_generated_at = NULL,
            current_step = 1, current_section = 1, placements_confirmed = 0,
            followup_counts = '{}',
            last_activity_at = ?, updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(session_id.to_string())
    .bind(user_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Session not found: {}", session_id)));
    }

    Ok(())
}
