//! Database layer tests: session persistence, the write-once guard pass,
//! conversation append ordering, and document index maintenance.

mod helpers;

use helpers::sample_placements;
use orrery_px::db;
use orrery_px::engine::MAX_FOLLOWUPS;
use orrery_px::models::{
    ConversationEntry, MessageKind, SessionRecord, UploadedDocument, FINAL_BRIEFING_STEP,
};
use sqlx::SqlitePool;
use uuid::Uuid;

async fn test_pool() -> SqlitePool {
    // One connection: each connection to sqlite::memory: is its own database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    db::init_tables(&pool)
        .await
        .expect("Failed to initialize database schema");
    pool
}

async fn insert_session(pool: &SqlitePool) -> SessionRecord {
    let session = SessionRecord::new(Uuid::new_v4(), "personal-alignment");
    db::sessions::create_session(pool, &session)
        .await
        .expect("create session");
    session
}

fn document_for(session: &SessionRecord, name: &str) -> UploadedDocument {
    UploadedDocument::new(
        session.user_id,
        session.id,
        session.current_step,
        name,
        &format!("{}/{}/{}", session.user_id, session.id, name),
        "image/png",
        1234,
    )
}

async fn insert_document(pool: &SqlitePool, session: &SessionRecord, name: &str) {
    let mut tx = pool.begin().await.unwrap();
    db::documents::insert_document_tx(&mut tx, &document_for(session, name))
        .await
        .expect("insert document");
    tx.commit().await.unwrap();
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_round_trip_preserves_placements() {
    let pool = test_pool().await;
    let mut session = insert_session(&pool).await;

    // Confirm with the sample store (sun known, moon UNKNOWN)
    let store = sample_placements();
    db::sessions::confirm_and_advance(&pool, session.id, session.user_id, &store)
        .await
        .expect("confirm");

    session = db::sessions::load_session(&pool, session.id, session.user_id)
        .await
        .expect("load")
        .expect("found");

    // Same field values, UNKNOWN preserved where unset
    assert_eq!(session.placements.as_ref(), Some(&store));
    assert!(session.placements_confirmed);
    assert_eq!(session.current_step, 2);
    assert_eq!(session.current_section, 1);
}

#[tokio::test]
async fn load_enforces_row_ownership() {
    let pool = test_pool().await;
    let session = insert_session(&pool).await;

    let stranger = Uuid::new_v4();
    let loaded = db::sessions::load_session(&pool, session.id, stranger)
        .await
        .expect("query ok");
    assert!(loaded.is_none());
}

#[tokio::test]
async fn find_session_for_product_is_per_user() {
    let pool = test_pool().await;
    let session = insert_session(&pool).await;

    let found = db::sessions::find_session_for_product(&pool, session.user_id, "personal-alignment")
        .await
        .expect("query ok")
        .expect("found");
    assert_eq!(found.id, session.id);

    let other = db::sessions::find_session_for_product(&pool, Uuid::new_v4(), "personal-alignment")
        .await
        .expect("query ok");
    assert!(other.is_none());
}

#[tokio::test]
async fn confirm_and_advance_clears_uploaded_documents() {
    let pool = test_pool().await;
    let session = insert_session(&pool).await;
    insert_document(&pool, &session, "chart-a.png").await;
    insert_document(&pool, &session, "chart-b.png").await;
    assert_eq!(db::documents::count_documents(&pool, session.id).await.unwrap(), 2);

    db::sessions::confirm_and_advance(&pool, session.id, session.user_id, &sample_placements())
        .await
        .expect("confirm");

    // Later steps never display stale uploads
    assert_eq!(db::documents::count_documents(&pool, session.id).await.unwrap(), 0);
}

#[tokio::test]
async fn guard_pass_persists_exactly_once() {
    let pool = test_pool().await;
    let session = insert_session(&pool).await;

    // Hand-write the inconsistent state: confirmed but empty, past step 1
    sqlx::query(
        "UPDATE product_sessions SET current_step = 3, placements_confirmed = 1 WHERE id = ?",
    )
    .bind(session.id.to_string())
    .execute(&pool)
    .await
    .unwrap();

    let normalized = db::sessions::load_session_normalized(&pool, session.id, session.user_id)
        .await
        .expect("load")
        .expect("found");
    assert_eq!(normalized.current_step, 1);
    assert!(!normalized.placements_confirmed);
    let first_updated_at = normalized.updated_at;

    // A second load observes a consistent row and writes nothing
    let reloaded = db::sessions::load_session_normalized(&pool, session.id, session.user_id)
        .await
        .expect("load")
        .expect("found");
    assert_eq!(reloaded.current_step, 1);
    assert_eq!(reloaded.updated_at, first_updated_at);
}

#[tokio::test]
async fn guard_pass_preserves_nonempty_placements() {
    let pool = test_pool().await;
    let session = insert_session(&pool).await;
    db::sessions::confirm_and_advance(&pool, session.id, session.user_id, &sample_placements())
        .await
        .unwrap();

    // Break only the confirmation flag
    sqlx::query("UPDATE product_sessions SET placements_confirmed = 0 WHERE id = ?")
        .bind(session.id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let normalized = db::sessions::load_session_normalized(&pool, session.id, session.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(normalized.current_step, 1);
    // Real data survives the reset so the user can re-confirm
    assert_eq!(normalized.placements.as_ref(), Some(&sample_placements()));
}

#[tokio::test]
async fn followup_count_increments_to_cap() {
    let pool = test_pool().await;
    let mut session = insert_session(&pool).await;

    for expected in 1..=MAX_FOLLOWUPS {
        let count = db::sessions::increment_followup_count(&pool, &session, 2)
            .await
            .expect("increment");
        assert_eq!(count, expected);
        session = db::sessions::load_session(&pool, session.id, session.user_id)
            .await
            .unwrap()
            .unwrap();
    }

    // The 4th increment is refused
    let result = db::sessions::increment_followup_count(&pool, &session, 2).await;
    assert!(result.is_err());
    assert_eq!(session.followup_count(2), MAX_FOLLOWUPS);

    // Other steps are unaffected
    assert_eq!(session.followup_count(3), 0);
}

#[tokio::test]
async fn store_deliverable_completes_session_and_logs_transcript() {
    let pool = test_pool().await;
    let session = insert_session(&pool).await;

    db::sessions::store_deliverable(&pool, &session, "The blueprint text")
        .await
        .expect("store deliverable");

    let completed = db::sessions::load_session(&pool, session.id, session.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(completed.is_complete);
    assert!(completed.completed_at.is_some());
    assert_eq!(completed.deliverable_content.as_deref(), Some("The blueprint text"));
    assert!(completed.deliverable_generated_at.is_some());

    // The step-999 transcript entry is written in the same transaction
    let log = db::conversations::load_conversation(&pool, session.id, FINAL_BRIEFING_STEP)
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].content, "The blueprint text");
    assert_eq!(log[0].kind, Some(MessageKind::FinalBriefing));

    // A completed session cannot be completed again
    let again = db::sessions::store_deliverable(&pool, &completed, "other text").await;
    assert!(again.is_err());
}

#[tokio::test]
async fn reset_clears_completion_but_keeps_placements() {
    let pool = test_pool().await;
    let session = insert_session(&pool).await;
    db::sessions::confirm_and_advance(&pool, session.id, session.user_id, &sample_placements())
        .await
        .unwrap();
    let confirmed = db::sessions::load_session(&pool, session.id, session.user_id)
        .await
        .unwrap()
        .unwrap();
    db::sessions::store_deliverable(&pool, &confirmed, "done").await.unwrap();

    db::sessions::reset_session(&pool, session.id, session.user_id)
        .await
        .expect("reset");

    let reset = db::sessions::load_session(&pool, session.id, session.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!reset.is_complete);
    assert!(reset.completed_at.is_none());
    assert!(reset.deliverable_content.is_none());
    assert_eq!(reset.current_step, 1);
    assert!(!reset.placements_confirmed);
    // Charts don't need re-uploading
    assert_eq!(reset.placements.as_ref(), Some(&sample_placements()));
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn conversation_appends_stay_ordered() {
    let pool = test_pool().await;
    let session_id = Uuid::new_v4();

    db::conversations::append_messages(
        &pool,
        session_id,
        2,
        &[ConversationEntry::user("first", MessageKind::MainResponse)],
    )
    .await
    .unwrap();
    db::conversations::append_messages(
        &pool,
        session_id,
        2,
        &[
            ConversationEntry::assistant("second", MessageKind::StepInsight),
            ConversationEntry::user("third", MessageKind::Followup),
        ],
    )
    .await
    .unwrap();

    let messages = db::conversations::load_conversation(&pool, session_id, 2)
        .await
        .unwrap();
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn has_main_response_requires_user_main_entry() {
    let pool = test_pool().await;
    let session_id = Uuid::new_v4();

    assert!(!db::conversations::has_main_response(&pool, session_id, 2)
        .await
        .unwrap());

    db::conversations::append_messages(
        &pool,
        session_id,
        2,
        &[ConversationEntry::assistant("insight", MessageKind::StepInsight)],
    )
    .await
    .unwrap();
    assert!(!db::conversations::has_main_response(&pool, session_id, 2)
        .await
        .unwrap());

    db::conversations::append_messages(
        &pool,
        session_id,
        2,
        &[ConversationEntry::user("answer", MessageKind::MainResponse)],
    )
    .await
    .unwrap();
    assert!(db::conversations::has_main_response(&pool, session_id, 2)
        .await
        .unwrap());
}

#[tokio::test]
async fn transcript_is_ordered_by_step() {
    let pool = test_pool().await;
    let session_id = Uuid::new_v4();

    // Insert out of order
    for step in [3u32, 2, 5] {
        db::conversations::append_messages(
            &pool,
            session_id,
            step,
            &[ConversationEntry::user(
                format!("answer {}", step),
                MessageKind::MainResponse,
            )],
        )
        .await
        .unwrap();
    }

    let transcript = db::conversations::load_transcript(&pool, session_id)
        .await
        .unwrap();
    let steps: Vec<u32> = transcript.iter().map(|(step, _)| *step).collect();
    assert_eq!(steps, vec![2, 3, 5]);
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn document_index_crud() {
    let pool = test_pool().await;
    let session = insert_session(&pool).await;

    insert_document(&pool, &session, "chart.png").await;
    // Keep created_at timestamps distinct for the ordering assertion
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    insert_document(&pool, &session, "design.pdf").await;

    let documents = db::documents::list_documents(&pool, session.id).await.unwrap();
    assert_eq!(documents.len(), 2);

    let paths = db::documents::storage_paths(&pool, session.id).await.unwrap();
    assert_eq!(paths.len(), 2);
    assert!(paths[0].ends_with("chart.png"));

    let first = documents[0].clone();
    let found = db::documents::find_document(&pool, session.id, first.id)
        .await
        .unwrap();
    assert!(found.is_some());

    assert!(db::documents::delete_document(&pool, session.id, first.id)
        .await
        .unwrap());
    assert_eq!(db::documents::count_documents(&pool, session.id).await.unwrap(), 1);

    // Deleting again reports nothing removed
    assert!(!db::documents::delete_document(&pool, session.id, first.id)
        .await
        .unwrap());
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompt_resolution_prefers_latest_active_override() {
    let pool = test_pool().await;
    let scope = db::prompts::PromptScope::StepInsight;

    // No override: fallback wins
    let prompt = db::prompts::get_prompt(&pool, "personal-alignment", scope, "fallback").await;
    assert_eq!(prompt, "fallback");

    db::prompts::upsert_prompt(&pool, "personal-alignment", scope, "override v1")
        .await
        .unwrap();
    db::prompts::upsert_prompt(&pool, "personal-alignment", scope, "override v2")
        .await
        .unwrap();

    let prompt = db::prompts::get_prompt(&pool, "personal-alignment", scope, "fallback").await;
    assert_eq!(prompt, "override v2");

    // Other scopes still fall back
    let other = db::prompts::get_prompt(
        &pool,
        "personal-alignment",
        db::prompts::PromptScope::Followup,
        "fallback",
    )
    .await;
    assert_eq!(other, "fallback");
}
