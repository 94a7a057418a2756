//! Shared test helpers: in-memory app, mock insight backend, HTTP utilities

// Not every test binary uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use orrery_common::{
    placements::{AstrologyPlacements, HumanDesignPlacements},
    Error, PlacementStore, Result,
};
use orrery_px::models::{ProductCatalog, ProductDefinition, ProductStep};
use orrery_px::services::{
    BlobStore, BriefingRequest, ExtractRequest, InsightBackend, InsightRequest,
};
use orrery_px::AppState;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

/// Mock insight backend with per-boundary failure switches and call counters
#[derive(Default)]
pub struct MockBackend {
    pub fail_extract: AtomicBool,
    pub fail_insight: AtomicBool,
    pub fail_briefing: AtomicBool,
    pub extract_calls: AtomicUsize,
    pub insight_calls: AtomicUsize,
    pub briefing_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Placement store the mock extraction returns: sun known, moon UNKNOWN,
/// HD type known.
pub fn sample_placements() -> PlacementStore {
    PlacementStore {
        astrology: AstrologyPlacements {
            sun: Some("Leo".to_string()),
            moon: Some("UNKNOWN".to_string()),
            rising: Some("Virgo".to_string()),
            ..Default::default()
        },
        human_design: HumanDesignPlacements {
            hd_type: Some("Generator".to_string()),
            strategy: Some("To respond".to_string()),
            ..Default::default()
        },
        notes: None,
    }
}

#[async_trait]
impl InsightBackend for MockBackend {
    async fn extract_placements(&self, _request: ExtractRequest) -> Result<PlacementStore> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_extract.load(Ordering::SeqCst) {
            return Err(Error::Upstream("extraction unavailable".to_string()));
        }
        Ok(sample_placements())
    }

    async fn step_insight(&self, request: InsightRequest) -> Result<String> {
        self.insight_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_insight.load(Ordering::SeqCst) {
            return Err(Error::Upstream("insight unavailable".to_string()));
        }
        Ok(format!(
            "Insight for step {}: noted \"{}\"",
            request.step_number, request.user_response
        ))
    }

    async fn final_briefing(&self, request: BriefingRequest) -> Result<String> {
        self.briefing_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_briefing.load(Ordering::SeqCst) {
            return Err(Error::Upstream("briefing unavailable".to_string()));
        }
        Ok(format!(
            "Blueprint for {} based on {} transcript bytes",
            request.product_slug,
            request.transcript.len()
        ))
    }
}

/// Three-step test product: chart intake, a follow-up-enabled question, and
/// a final question without follow-ups.
pub fn test_product() -> ProductDefinition {
    ProductDefinition {
        product_slug: "personal-alignment".to_string(),
        name: "Personal Alignment Orientation".to_string(),
        description: String::new(),
        system_prompt: "You are the guide.".to_string(),
        final_briefing_prompt: "Produce the blueprint.".to_string(),
        steps: vec![
            ProductStep {
                step: 1,
                title: "Upload Your Charts".to_string(),
                subtitle: String::new(),
                question: String::new(),
                prompt: String::new(),
                allow_file_upload: true,
                allow_followup: false,
            },
            ProductStep {
                step: 2,
                title: "Core Values".to_string(),
                subtitle: String::new(),
                question: "What matters most to you?".to_string(),
                prompt: "Extract values.".to_string(),
                allow_file_upload: false,
                allow_followup: true,
            },
            ProductStep {
                step: 3,
                title: "Life Vision".to_string(),
                subtitle: String::new(),
                question: "Where are you headed?".to_string(),
                prompt: "Synthesize the vision.".to_string(),
                allow_file_upload: false,
                allow_followup: false,
            },
        ],
    }
}

pub struct TestApp {
    pub router: Router,
    pub pool: sqlx::SqlitePool,
    pub backend: Arc<MockBackend>,
    pub user_id: Uuid,
    // Holds the blob directory alive for the test's duration
    _blob_dir: tempfile::TempDir,
}

/// Build a test app over an in-memory database and the mock backend.
///
/// A single pooled connection, since each connection to `sqlite::memory:`
/// would otherwise get its own empty database.
pub async fn create_test_app() -> TestApp {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    orrery_px::db::init_tables(&pool)
        .await
        .expect("Failed to initialize database schema");

    let catalog =
        ProductCatalog::from_definitions(vec![test_product()]).expect("valid test product");

    let blob_dir = tempfile::tempdir().expect("tempdir");
    let blobs = BlobStore::new(blob_dir.path().to_path_buf());

    let backend = MockBackend::new();
    let state = AppState::new(pool.clone(), catalog, backend.clone(), blobs);
    let router = orrery_px::build_router(state);

    TestApp {
        router,
        pool,
        backend,
        user_id: Uuid::new_v4(),
        _blob_dir: blob_dir,
    }
}

impl TestApp {
    /// POST with a JSON body as the test user
    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .header("x-user-id", self.user_id.to_string())
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// POST with an empty body as the test user
    pub async fn post_empty(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("x-user-id", self.user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// GET as the test user
    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("x-user-id", self.user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// GET as an arbitrary user
    pub async fn get_as(&self, uri: &str, user_id: Uuid) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("x-user-id", user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// DELETE as the test user
    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(uri)
                    .header("x-user-id", self.user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Upload raw bytes as a named file
    pub async fn upload(&self, session_id: Uuid, file_name: &str, bytes: &[u8]) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/api/sessions/{}/documents?file_name={}",
                        session_id, file_name
                    ))
                    .header("x-user-id", self.user_id.to_string())
                    .body(Body::from(bytes.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Create or resume the test user's session; returns the snapshot JSON
    pub async fn start_session(&self) -> serde_json::Value {
        let response = self
            .post_empty("/api/products/personal-alignment/sessions")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    /// Drive a fresh session through upload -> extract -> confirm, landing
    /// on step 2 with confirmed placements.
    pub async fn session_past_gate(&self) -> Uuid {
        let snapshot = self.start_session().await;
        let session_id: Uuid = snapshot["session_id"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .expect("session id");

        let response = self
            .upload(session_id, "birth-chart.png", b"\x89PNG\r\n\x1a\nchart")
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = self
            .post_empty(&format!("/api/sessions/{}/extract", session_id))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let extracted = json_body(response).await;

        let response = self
            .post_json(
                &format!("/api/sessions/{}/confirm", session_id),
                serde_json::json!({ "placements": extracted["placements"] }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        session_id
    }
}

/// Collect a response body as JSON
pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}
