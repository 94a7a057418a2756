//! Uploaded document API handlers
//!
//! Upload, list, and remove chart files. A new upload while placements are
//! confirmed forces re-confirmation in the same transaction that makes the
//! document row visible.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{current_phase, load_owned_session, require_user};
use crate::db;
use crate::engine::{self, SessionEvent};
use crate::error::{ApiError, ApiResult};
use crate::models::UploadedDocument;
use crate::AppState;

/// Upload size cap (10 MiB, matches typical chart exports)
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: String,
}

/// POST /api/sessions/{id}/documents?file_name=...
///
/// Raw request body is the file content.
pub async fn upload_document(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<UploadedDocument>> {
    let user_id = require_user(&headers)?;
    let (session, product) = load_owned_session(&state, session_id, user_id).await?;

    if body.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }
    if body.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::BadRequest(format!(
            "File exceeds the {} MiB upload limit",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        )));
    }

    let phase = current_phase(&state, &session, &product).await?;
    engine::transition(phase, SessionEvent::FileUploaded)?;

    let was_confirmed = session.placements_confirmed;
    let blob = state
        .blobs
        .store(user_id, session.id, &query.file_name, &body)?;

    let document = UploadedDocument::new(
        user_id,
        session.id,
        session.current_step,
        &query.file_name,
        &blob.storage_path,
        &blob.file_type,
        blob.file_size,
    );

    // Re-confirmation (when needed) and the index row land in one transaction
    let mut tx = state.db.begin().await.map_err(orrery_common::Error::from)?;
    if was_confirmed {
        tracing::info!(
            session_id = %session.id,
            "New upload on confirmed session; forcing re-confirmation"
        );
        db::sessions::force_reconfirmation(&mut tx, session.id, user_id).await?;
    }
    db::documents::insert_document_tx(&mut tx, &document).await?;
    tx.commit().await.map_err(orrery_common::Error::from)?;

    tracing::debug!(
        session_id = %session.id,
        document_id = %document.id,
        file_name = %document.file_name,
        size = document.file_size,
        "Document uploaded"
    );

    Ok(Json(document))
}

/// GET /api/sessions/{id}/documents
pub async fn list_documents(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<UploadedDocument>>> {
    let user_id = require_user(&headers)?;
    let (session, _product) = load_owned_session(&state, session_id, user_id).await?;

    Ok(Json(db::documents::list_documents(&state.db, session.id).await?))
}

/// DELETE /api/sessions/{id}/documents/{doc_id}
///
/// Removes the blob and the index row. Session state is untouched.
pub async fn remove_document(
    State(state): State<AppState>,
    Path((session_id, document_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&headers)?;
    let (session, _product) = load_owned_session(&state, session_id, user_id).await?;

    let document = db::documents::find_document(&state.db, session.id, document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document not found: {}", document_id)))?;

    db::documents::delete_document(&state.db, session.id, document_id).await?;

    if let Err(e) = state.blobs.remove(&document.storage_path) {
        // The index row is already gone; a stranded blob is only log noise
        tracing::warn!(
            storage_path = %document.storage_path,
            error = %e,
            "Failed to remove blob"
        );
    }

    Ok(Json(serde_json::json!({ "removed": document_id })))
}

/// Build document routes
pub fn document_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/sessions/:id/documents",
            post(upload_document).get(list_documents),
        )
        .route("/api/sessions/:id/documents/:doc_id", delete(remove_document))
}
