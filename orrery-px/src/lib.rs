//! orrery-px library interface
//!
//! Exposes the application state, router, and the session engine for
//! integration testing.

pub mod api;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::models::ProductCatalog;
use crate::services::{BlobStore, InsightBackend, SessionRateLimiter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Read-only product definitions
    pub catalog: Arc<ProductCatalog>,
    /// AI boundary (extraction, insight, briefing)
    pub insight: Arc<dyn InsightBackend>,
    /// Uploaded chart blob store
    pub blobs: Arc<BlobStore>,
    /// Per-session budget on AI-backed endpoints
    pub limiter: Arc<SessionRateLimiter>,
    /// Sessions with a state-changing operation in flight
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        catalog: ProductCatalog,
        insight: Arc<dyn InsightBackend>,
        blobs: BlobStore,
    ) -> Self {
        Self {
            db,
            catalog: Arc::new(catalog),
            insight,
            blobs: Arc::new(blobs),
            limiter: Arc::new(SessionRateLimiter::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Claim the session for one state-changing operation.
    ///
    /// A second submission while one is in flight gets a 409 instead of
    /// racing it; the claim releases when the guard drops. This is what
    /// makes a double-fired advance unable to skip two steps.
    pub fn begin_exclusive(&self, session_id: Uuid) -> ApiResult<OpGuard> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| ApiError::Internal("In-flight lock poisoned".to_string()))?;
        if !in_flight.insert(session_id) {
            return Err(ApiError::Conflict(
                "Another operation is already in progress for this session".to_string(),
            ));
        }
        Ok(OpGuard {
            in_flight: Arc::clone(&self.in_flight),
            session_id,
        })
    }

    /// Record a diagnostic error surfaced via /health
    pub async fn record_error(&self, message: String) {
        *self.last_error.write().await = Some(message);
    }
}

/// Releases a session's exclusive-operation claim on drop
pub struct OpGuard {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    session_id: Uuid,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.session_id);
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::session_routes())
        .merge(api::document_routes())
        .merge(api::placement_routes())
        .merge(api::step_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
