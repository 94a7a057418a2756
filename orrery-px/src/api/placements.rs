//! Confirmation gate API handlers
//!
//! Extraction returns a draft placement store without persisting anything;
//! nothing is considered confirmed until the confirm write succeeds, and
//! confirm+advance is a single atomic server operation.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use orrery_common::PlacementStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{build_snapshot, current_phase, load_owned_session, require_user, SessionSnapshot};
use crate::db;
use crate::engine::{self, SessionEvent};
use crate::error::{ApiError, ApiResult};
use crate::services::ExtractRequest;
use crate::AppState;

/// POST /api/sessions/{id}/extract response
#[derive(Debug, Serialize)]
pub struct ExtractPlacementsResponse {
    /// Draft placement store; NOT persisted until confirmed
    pub placements: PlacementStore,
}

/// POST /api/sessions/{id}/confirm request
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub placements: PlacementStore,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /api/sessions/{id}/extract
///
/// Run the extraction service over the session's uploaded files. On failure
/// the prior state is untouched and the user may retry or re-upload.
pub async fn extract_placements(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<ExtractPlacementsResponse>> {
    let user_id = require_user(&headers)?;
    let _guard = state.begin_exclusive(session_id)?;

    let (session, product) = load_owned_session(&state, session_id, user_id).await?;

    let storage_paths = db::documents::storage_paths(&state.db, session.id).await?;
    if storage_paths.is_empty() {
        return Err(ApiError::BadRequest(
            "Please attach at least one file to continue".to_string(),
        ));
    }

    let phase = current_phase(&state, &session, &product).await?;
    engine::transition(phase, SessionEvent::ExtractionSucceeded)?;

    if state.limiter.check(session.id).is_err() {
        return Err(ApiError::RateLimited(
            "Please wait before making more requests".to_string(),
        ));
    }

    let request = ExtractRequest {
        session_id: session.id,
        storage_paths,
    };

    let placements = state.insight.extract_placements(request).await.map_err(|e| {
        tracing::warn!(session_id = %session.id, error = %e, "Placement extraction failed");
        ApiError::Upstream(format!(
            "Failed to extract placements. Please try again. ({})",
            e
        ))
    })?;

    tracing::info!(session_id = %session.id, "Placements extracted");

    Ok(Json(ExtractPlacementsResponse { placements }))
}

/// POST /api/sessions/{id}/confirm
///
/// Persist the reviewed placement store and advance past the gate. One
/// transaction writes placements, the confirmation flag, the step pointer,
/// and clears the uploaded-file list; on failure the gate stays open.
pub async fn confirm_placements(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let user_id = require_user(&headers)?;
    let _guard = state.begin_exclusive(session_id)?;

    let (session, product) = load_owned_session(&state, session_id, user_id).await?;

    let phase = current_phase(&state, &session, &product).await?;
    engine::transition(phase, SessionEvent::PlacementsConfirmed)?;

    let store = request.placements.with_notes(request.notes);
    if store.is_empty() {
        return Err(ApiError::BadRequest(
            "No placement data to confirm; extract placements or enter them first".to_string(),
        ));
    }

    db::sessions::confirm_and_advance(&state.db, session.id, user_id, &store).await?;

    tracing::info!(session_id = %session.id, "Placements confirmed; advanced past the gate");

    let session = db::sessions::load_session(&state.db, session.id, user_id)
        .await?
        .ok_or_else(|| ApiError::Internal("Session vanished after confirm".to_string()))?;

    Ok(Json(build_snapshot(&state, &session, &product).await?))
}

/// Build confirmation gate routes
pub fn placement_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions/:id/extract", post(extract_placements))
        .route("/api/sessions/:id/confirm", post(confirm_placements))
}
