//! HTTP API handlers for orrery-px

pub mod documents;
pub mod health;
pub mod placements;
pub mod sessions;
pub mod steps;

pub use documents::document_routes;
pub use health::health_routes;
pub use placements::placement_routes;
pub use sessions::session_routes;
pub use steps::step_routes;

use axum::http::HeaderMap;
use orrery_common::PlacementStore;
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::engine::{self, SessionPhase};
use crate::error::{ApiError, ApiResult};
use crate::models::{ConversationEntry, MessageRole, ProductDefinition, SessionRecord};
use crate::services::BriefingRequest;
use crate::AppState;

/// Extract the authenticated caller from the x-user-id header (set by the
/// fronting auth proxy).
pub fn require_user(headers: &HeaderMap) -> ApiResult<Uuid> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing x-user-id header".to_string()))?;
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::Unauthorized("Invalid x-user-id header".to_string()))
}

/// Session snapshot returned by most endpoints
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub product_slug: String,
    pub product_name: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub current_section: u32,
    pub completion_percentage: u32,
    pub phase: SessionPhase,
    pub placements: Option<PlacementStore>,
    pub placements_confirmed: bool,
    pub followups_remaining: u8,
    pub document_count: usize,
    pub is_complete: bool,
    pub deliverable_available: bool,
}

/// Load a session with the guard pass applied, enforcing ownership
pub(crate) async fn load_owned_session(
    state: &AppState,
    session_id: Uuid,
    user_id: Uuid,
) -> ApiResult<(SessionRecord, std::sync::Arc<ProductDefinition>)> {
    let session = db::sessions::load_session_normalized(&state.db, session_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))?;

    let product = state.catalog.get(&session.product_slug).ok_or_else(|| {
        ApiError::Internal(format!(
            "No product definition for slug '{}'",
            session.product_slug
        ))
    })?;

    Ok((session, product))
}

/// Derive the authoritative phase for a loaded session
pub(crate) async fn current_phase(
    state: &AppState,
    session: &SessionRecord,
    product: &ProductDefinition,
) -> ApiResult<SessionPhase> {
    let document_count = db::documents::count_documents(&state.db, session.id).await?;
    let has_main_response =
        db::conversations::has_main_response(&state.db, session.id, session.current_step).await?;
    Ok(engine::derive_phase(
        session,
        product,
        document_count,
        has_main_response,
    ))
}

/// Build the snapshot response for a session
pub(crate) async fn build_snapshot(
    state: &AppState,
    session: &SessionRecord,
    product: &ProductDefinition,
) -> ApiResult<SessionSnapshot> {
    let document_count = db::documents::count_documents(&state.db, session.id).await?;
    let has_main_response =
        db::conversations::has_main_response(&state.db, session.id, session.current_step).await?;
    let phase = engine::derive_phase(session, product, document_count, has_main_response);

    let total_steps = product.total_steps();
    let completion_percentage = if session.is_complete {
        100
    } else if total_steps > 0 {
        ((session.current_step as f64 / total_steps as f64) * 100.0).round() as u32
    } else {
        0
    };

    Ok(SessionSnapshot {
        session_id: session.id,
        product_slug: session.product_slug.clone(),
        product_name: product.name.clone(),
        current_step: session.current_step,
        total_steps,
        current_section: session.current_section,
        completion_percentage,
        phase,
        placements: session.placements.clone(),
        placements_confirmed: session.placements_confirmed,
        followups_remaining: engine::followups_remaining(
            session.followup_count(session.current_step),
        ),
        document_count,
        is_complete: session.is_complete,
        deliverable_available: session.deliverable_content.is_some(),
    })
}

/// Render the full transcript for the briefing request, step by step
pub(crate) fn render_transcript(transcript: &[(u32, Vec<ConversationEntry>)]) -> String {
    let mut lines = Vec::new();
    for (step, messages) in transcript {
        if *step == crate::models::FINAL_BRIEFING_STEP {
            continue;
        }
        for message in messages {
            let speaker = match message.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::System => "system",
            };
            lines.push(format!("Step {} {}: {}", step, speaker, message.content));
        }
    }
    lines.join("\n\n")
}

/// Run the Deliverable Generator for a session on its last step.
///
/// Required call: a gateway failure is fatal for this attempt, the session
/// stays incomplete and untouched, and the caller surfaces the error. On
/// success the artifact and completion state are persisted atomically before
/// the snapshot is rebuilt.
pub(crate) async fn generate_and_store_deliverable(
    state: &AppState,
    session: &SessionRecord,
    product: &ProductDefinition,
) -> ApiResult<SessionRecord> {
    if state.limiter.check(session.id).is_err() {
        return Err(ApiError::RateLimited(
            "Please wait before making more requests".to_string(),
        ));
    }

    // Invariant A guarantees confirmed placements this deep into the flow.
    let placements = session.placements.clone().ok_or_else(|| {
        ApiError::Internal("Session reached generation without placements".to_string())
    })?;

    let transcript = db::conversations::load_transcript(&state.db, session.id).await?;
    let system_prompt = db::prompts::get_prompt(
        &state.db,
        &session.product_slug,
        db::prompts::PromptScope::FinalBriefing,
        &product.final_briefing_prompt,
    )
    .await;

    let request = BriefingRequest {
        session_id: session.id,
        product_slug: session.product_slug.clone(),
        placements,
        system_prompt,
        transcript: render_transcript(&transcript),
    };

    let briefing = match state.insight.final_briefing(request).await {
        Ok(briefing) => briefing,
        Err(e) => {
            tracing::error!(session_id = %session.id, error = %e, "Final briefing failed");
            state.record_error(format!("Final briefing failed: {}", e)).await;
            return Err(ApiError::Upstream(format!(
                "Deliverable generation failed: {}",
                e
            )));
        }
    };

    db::sessions::store_deliverable(&state.db, session, &briefing).await?;

    tracing::info!(
        session_id = %session.id,
        length = briefing.len(),
        "Deliverable generated and session completed"
    );

    let completed = db::sessions::load_session(&state.db, session.id, session.user_id)
        .await?
        .ok_or_else(|| ApiError::Internal("Session vanished after completion".to_string()))?;

    Ok(completed)
}
