//! Step engine API handlers
//!
//! Step submission and the bounded follow-up sub-dialogue. The step insight
//! after a submission is advisory: its failure degrades the reply but never
//! blocks progression. Follow-up replies are required calls.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    build_snapshot, current_phase, generate_and_store_deliverable, load_owned_session,
    require_user, SessionSnapshot,
};
use crate::db;
use crate::engine::{self, SessionEvent, StepAdvance, SubmissionKind, MAX_FOLLOWUPS};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    ConversationEntry, MessageKind, MessageRole, ProductDefinition, ProductStep, SessionRecord,
};
use crate::services::{HistoryMessage, InsightRequest};
use crate::AppState;

/// POST /api/sessions/{id}/steps/{n}/submit request
#[derive(Debug, Deserialize, Default)]
pub struct SubmitStepRequest {
    #[serde(default)]
    pub response: Option<String>,
}

/// POST /api/sessions/{id}/steps/{n}/submit response
#[derive(Debug, Serialize)]
pub struct SubmitStepResponse {
    /// Advisory insight reply; empty when the insight call failed or the
    /// step is upload-only
    pub ai_response: String,
    pub snapshot: SessionSnapshot,
}

/// POST /api/sessions/{id}/followups request
#[derive(Debug, Deserialize)]
pub struct FollowUpRequest {
    pub question: String,
}

/// POST /api/sessions/{id}/followups response
#[derive(Debug, Serialize)]
pub struct FollowUpResponse {
    pub ai_response: String,
    pub followups_remaining: u8,
}

/// POST /api/sessions/{id}/steps/{n}/submit
pub async fn submit_step(
    State(state): State<AppState>,
    Path((session_id, step_number)): Path<(Uuid, u32)>,
    headers: HeaderMap,
    Json(request): Json<SubmitStepRequest>,
) -> ApiResult<Json<SubmitStepResponse>> {
    let user_id = require_user(&headers)?;
    let _guard = state.begin_exclusive(session_id)?;

    let (mut session, product) = load_owned_session(&state, session_id, user_id).await?;

    if step_number != session.current_step {
        return Err(ApiError::Conflict(format!(
            "Step {} is not the session's current step ({})",
            step_number, session.current_step
        )));
    }

    let step = product
        .step(step_number)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown step: {}", step_number)))?;

    let document_count = db::documents::count_documents(&state.db, session.id).await?;
    let followup_available =
        step.allow_followup && session.followup_count(step_number) < MAX_FOLLOWUPS;

    let phase = current_phase(&state, &session, &product).await?;
    engine::transition(phase, SessionEvent::StepSubmitted { followup_available })?;

    // Local validation: no server round-trip for a blank submission
    let kind = engine::validate_submission(
        step,
        request.response.as_deref(),
        document_count,
    )?;

    let content = match kind {
        SubmissionKind::Files => {
            let names: Vec<String> = db::documents::list_documents(&state.db, session.id)
                .await?
                .into_iter()
                .map(|d| d.file_name)
                .collect();
            format!("Uploaded files: {}", names.join(", "))
        }
        SubmissionKind::Text => request
            .response
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string(),
    };

    db::sessions::record_step_answer(&state.db, &session, step_number, &content).await?;
    db::conversations::append_messages(
        &state.db,
        session.id,
        step_number,
        &[ConversationEntry::user(&content, MessageKind::MainResponse)],
    )
    .await?;

    tracing::debug!(session_id = %session.id, step = step_number, "Step response recorded");

    // Advisory insight: failure is logged and the reply stays empty
    let ai_response = if kind == SubmissionKind::Text {
        advisory_step_insight(&state, &session, &product, step, &content).await
    } else {
        None
    };

    if let Some(reply) = ai_response.as_deref() {
        db::conversations::append_messages(
            &state.db,
            session.id,
            step_number,
            &[ConversationEntry::assistant(reply, MessageKind::StepInsight)],
        )
        .await?;
    }

    if !followup_available {
        // No follow-up window: advance inline (or generate on the last step)
        match engine::next_step(session.current_step, product.total_steps()) {
            StepAdvance::Step(next) => {
                db::sessions::update_step_pointer(&state.db, &session, next).await?;
                session.current_step = next;
            }
            StepAdvance::GenerateDeliverable => {
                session = generate_and_store_deliverable(&state, &session, &product).await?;
            }
        }
    }

    Ok(Json(SubmitStepResponse {
        ai_response: ai_response.unwrap_or_default(),
        snapshot: build_snapshot(&state, &session, &product).await?,
    }))
}

/// POST /api/sessions/{id}/followups
pub async fn ask_followup(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<FollowUpRequest>,
) -> ApiResult<Json<FollowUpResponse>> {
    let user_id = require_user(&headers)?;
    let _guard = state.begin_exclusive(session_id)?;

    let (session, product) = load_owned_session(&state, session_id, user_id).await?;

    let step_number = session.current_step;
    let step = product
        .step(step_number)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown step: {}", step_number)))?;

    if !step.allow_followup {
        return Err(ApiError::Conflict(
            "This step does not allow follow-up questions".to_string(),
        ));
    }

    // Cap check happens before any network call
    if session.followup_count(step_number) >= MAX_FOLLOWUPS {
        return Err(ApiError::Conflict(
            "No more follow-up questions available for this step".to_string(),
        ));
    }

    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "A follow-up question is required".to_string(),
        ));
    }

    let has_main =
        db::conversations::has_main_response(&state.db, session.id, step_number).await?;
    if !has_main {
        return Err(ApiError::Conflict(
            "Answer the step's main question before asking follow-ups".to_string(),
        ));
    }

    let phase = current_phase(&state, &session, &product).await?;
    engine::transition(phase, SessionEvent::FollowUpAsked)?;

    if state.limiter.check(session.id).is_err() {
        return Err(ApiError::RateLimited(
            "Please wait before making more requests".to_string(),
        ));
    }

    // Follow-up replies are required: a failure surfaces and the counter
    // stays untouched so the attempt isn't spent.
    let history = db::conversations::load_conversation(&state.db, session.id, step_number)
        .await?
        .into_iter()
        .map(|entry| HistoryMessage {
            role: match entry.role {
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
                MessageRole::System => "system".to_string(),
            },
            content: entry.content,
        })
        .collect();

    let system_prompt = db::prompts::get_prompt(
        &state.db,
        &session.product_slug,
        db::prompts::PromptScope::Followup,
        &product.system_prompt,
    )
    .await;

    let insight_request = InsightRequest {
        session_id: session.id,
        step_number,
        step_title: step.title.clone(),
        step_question: step.question.clone(),
        step_prompt: step.prompt.clone(),
        user_response: request.question.trim().to_string(),
        placements: session.placements.clone(),
        system_prompt,
        history,
    };

    let reply = state.insight.step_insight(insight_request).await.map_err(|e| {
        tracing::warn!(session_id = %session.id, step = step_number, error = %e, "Follow-up reply failed");
        ApiError::Upstream(format!("Follow-up failed. Please try again. ({})", e))
    })?;

    db::conversations::append_messages(
        &state.db,
        session.id,
        step_number,
        &[
            ConversationEntry::user(request.question.trim(), MessageKind::Followup),
            ConversationEntry::assistant(&reply, MessageKind::Followup),
        ],
    )
    .await?;

    let new_count = db::sessions::increment_followup_count(&state.db, &session, step_number).await?;

    tracing::debug!(
        session_id = %session.id,
        step = step_number,
        count = new_count,
        "Follow-up exchanged"
    );

    Ok(Json(FollowUpResponse {
        ai_response: reply,
        followups_remaining: engine::followups_remaining(new_count),
    }))
}

/// Advisory step insight: every failure becomes a logged warning and an
/// absent reply. Kept separate from the required-call paths on purpose.
async fn advisory_step_insight(
    state: &AppState,
    session: &SessionRecord,
    product: &ProductDefinition,
    step: &ProductStep,
    user_response: &str,
) -> Option<String> {
    let system_prompt = db::prompts::get_prompt(
        &state.db,
        &session.product_slug,
        db::prompts::PromptScope::StepInsight,
        &product.system_prompt,
    )
    .await;

    let request = InsightRequest {
        session_id: session.id,
        step_number: session.current_step,
        step_title: step.title.clone(),
        step_question: step.question.clone(),
        step_prompt: step.prompt.clone(),
        user_response: user_response.to_string(),
        placements: session.placements.clone(),
        system_prompt,
        history: Vec::new(),
    };

    match state.insight.step_insight(request).await {
        Ok(reply) => Some(reply),
        Err(e) => {
            tracing::warn!(
                session_id = %session.id,
                step = session.current_step,
                error = %e,
                "Step insight failed; continuing without a reply"
            );
            None
        }
    }
}

/// Build step engine routes
pub fn step_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions/:id/steps/:step/submit", post(submit_step))
        .route("/api/sessions/:id/followups", post(ask_followup))
}
