//! Session lifecycle API handlers
//!
//! Create/resume, snapshot, advance, back, reset, transcript, deliverable.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::{
    build_snapshot, current_phase, generate_and_store_deliverable, load_owned_session,
    require_user, SessionSnapshot,
};
use crate::db;
use crate::engine::{self, SessionEvent, StepAdvance};
use crate::error::{ApiError, ApiResult};
use crate::models::{ConversationEntry, SessionRecord};
use crate::AppState;

/// GET /api/sessions/{id}/conversations response entry
#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub step_number: u32,
    pub messages: Vec<ConversationEntry>,
}

/// GET /api/sessions/{id}/deliverable response
#[derive(Debug, Serialize)]
pub struct DeliverableResponse {
    pub session_id: Uuid,
    pub deliverable: String,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// POST /api/products/{slug}/sessions
///
/// Create the caller's session for a product, or resume the existing one.
pub async fn create_or_resume_session(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionSnapshot>> {
    let user_id = require_user(&headers)?;

    let product = state
        .catalog
        .get(&slug)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown product: {}", slug)))?;

    let session = match db::sessions::find_session_for_product(&state.db, user_id, &slug).await? {
        Some(existing) => {
            tracing::debug!(session_id = %existing.id, user_id = %user_id, "Resuming session");
            // Run the guard pass on resume
            db::sessions::load_session_normalized(&state.db, existing.id, user_id)
                .await?
                .ok_or_else(|| ApiError::Internal("Session vanished on resume".to_string()))?
        }
        None => {
            let session = SessionRecord::new(user_id, &slug);
            db::sessions::create_session(&state.db, &session).await?;
            tracing::info!(
                session_id = %session.id,
                user_id = %user_id,
                product_slug = %slug,
                "Session created"
            );
            session
        }
    };

    Ok(Json(build_snapshot(&state, &session, &product).await?))
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionSnapshot>> {
    let user_id = require_user(&headers)?;
    let (session, product) = load_owned_session(&state, session_id, user_id).await?;
    Ok(Json(build_snapshot(&state, &session, &product).await?))
}

/// POST /api/sessions/{id}/advance
///
/// Explicit continue: from the follow-up sub-dialogue or a submitted step.
/// Past the last step this triggers deliverable generation.
pub async fn advance_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionSnapshot>> {
    let user_id = require_user(&headers)?;
    let _guard = state.begin_exclusive(session_id)?;

    let (mut session, product) = load_owned_session(&state, session_id, user_id).await?;

    // Continuing requires the step's primary answer on record; this also
    // makes a duplicate advance a no-op conflict instead of a double skip.
    let has_main =
        db::conversations::has_main_response(&state.db, session.id, session.current_step).await?;
    if !has_main {
        return Err(ApiError::Conflict(
            "Submit a response for the current step before continuing".to_string(),
        ));
    }

    let total = product.total_steps();
    let phase = current_phase(&state, &session, &product).await?;
    engine::transition(
        phase,
        SessionEvent::ContinueRequested {
            has_next: session.current_step < total,
        },
    )?;

    match engine::next_step(session.current_step, total) {
        StepAdvance::Step(next) => {
            db::sessions::update_step_pointer(&state.db, &session, next).await?;
            session.current_step = next;
            tracing::debug!(session_id = %session.id, step = next, "Advanced to next step");
        }
        StepAdvance::GenerateDeliverable => {
            session = generate_and_store_deliverable(&state, &session, &product).await?;
        }
    }

    Ok(Json(build_snapshot(&state, &session, &product).await?))
}

/// POST /api/sessions/{id}/back
///
/// Step back one step; only permitted past step 1. Placements and the
/// confirmation flag are untouched.
pub async fn go_back(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionSnapshot>> {
    let user_id = require_user(&headers)?;
    let _guard = state.begin_exclusive(session_id)?;

    let (mut session, product) = load_owned_session(&state, session_id, user_id).await?;

    let phase = current_phase(&state, &session, &product).await?;
    engine::transition(phase, SessionEvent::WentBack)?;

    let previous = session.current_step - 1;
    db::sessions::update_step_pointer(&state.db, &session, previous).await?;
    session.current_step = previous;

    Ok(Json(build_snapshot(&state, &session, &product).await?))
}

/// POST /api/sessions/{id}/reset
///
/// Clear completion state and return to step 1 unconfirmed. Stored
/// placements are kept so charts don't need re-uploading.
pub async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionSnapshot>> {
    let user_id = require_user(&headers)?;
    let _guard = state.begin_exclusive(session_id)?;

    // Reset applies to complete sessions too, so skip the guard-pass load
    let (session, product) = load_owned_session(&state, session_id, user_id).await?;

    db::sessions::reset_session(&state.db, session.id, user_id).await?;
    tracing::info!(session_id = %session.id, "Session reset");

    let session = db::sessions::load_session(&state.db, session.id, user_id)
        .await?
        .ok_or_else(|| ApiError::Internal("Session vanished after reset".to_string()))?;

    Ok(Json(build_snapshot(&state, &session, &product).await?))
}

/// GET /api/sessions/{id}/conversations
pub async fn get_conversations(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ConversationView>>> {
    let user_id = require_user(&headers)?;
    let (session, _product) = load_owned_session(&state, session_id, user_id).await?;

    let transcript = db::conversations::load_transcript(&state.db, session.id).await?;
    let view = transcript
        .into_iter()
        .map(|(step_number, messages)| ConversationView {
            step_number,
            messages,
        })
        .collect();

    Ok(Json(view))
}

/// GET /api/sessions/{id}/deliverable
pub async fn get_deliverable(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<DeliverableResponse>> {
    let user_id = require_user(&headers)?;
    let (session, _product) = load_owned_session(&state, session_id, user_id).await?;

    match (session.deliverable_content, session.deliverable_generated_at) {
        (Some(deliverable), Some(generated_at)) => Ok(Json(DeliverableResponse {
            session_id: session.id,
            deliverable,
            generated_at,
        })),
        _ => Err(ApiError::NotFound(
            "Deliverable not generated yet".to_string(),
        )),
    }
}

/// Build session lifecycle routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/products/:slug/sessions", post(create_or_resume_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/advance", post(advance_session))
        .route("/api/sessions/:id/back", post(go_back))
        .route("/api/sessions/:id/reset", post(reset_session))
        .route("/api/sessions/:id/conversations", get(get_conversations))
        .route("/api/sessions/:id/deliverable", get(get_deliverable))
}
