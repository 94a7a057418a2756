//! Insight gateway client
//!
//! HTTP client for the three AI boundaries the session engine depends on:
//! placement extraction, per-step insights, and the final briefing. Each
//! call carries its own bounded timeout; a slow upstream surfaces as a
//! retryable error instead of hanging a session operation forever.
//!
//! The [`InsightBackend`] trait is the seam: handlers talk to the trait, the
//! gateway is the production implementation, tests substitute mocks.

use async_trait::async_trait;
use orrery_common::{Error, PlacementStore, Result};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Timeout for placement extraction (vision-heavy, slowest call)
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for per-step insight replies
const INSIGHT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for final briefing generation
const BRIEFING_TIMEOUT: Duration = Duration::from_secs(120);

/// Extraction request: uploaded chart files to a placement store
#[derive(Debug, Clone, Serialize)]
pub struct ExtractRequest {
    pub session_id: Uuid,
    pub storage_paths: Vec<String>,
}

/// Step insight / follow-up request
#[derive(Debug, Clone, Serialize)]
pub struct InsightRequest {
    pub session_id: Uuid,
    pub step_number: u32,
    pub step_title: String,
    pub step_question: String,
    pub step_prompt: String,
    pub user_response: String,
    pub placements: Option<PlacementStore>,
    pub system_prompt: String,
    /// Prior exchange contents for follow-up context, oldest first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryMessage>,
}

/// One prior exchange line sent as follow-up context
#[derive(Debug, Clone, Serialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// Final briefing request
#[derive(Debug, Clone, Serialize)]
pub struct BriefingRequest {
    pub session_id: Uuid,
    pub product_slug: String,
    pub placements: PlacementStore,
    pub system_prompt: String,
    /// Full ordered transcript, rendered as "Step N: content" lines
    pub transcript: String,
}

/// AI boundary seam
#[async_trait]
pub trait InsightBackend: Send + Sync {
    /// Turn uploaded chart files into a placement store
    async fn extract_placements(&self, request: ExtractRequest) -> Result<PlacementStore>;

    /// Produce an insight reply for a step answer or follow-up question
    async fn step_insight(&self, request: InsightRequest) -> Result<String>;

    /// Produce the final deliverable text
    async fn final_briefing(&self, request: BriefingRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    placements: PlacementStore,
}

#[derive(Debug, Deserialize)]
struct InsightResponse {
    ai_response: String,
}

#[derive(Debug, Deserialize)]
struct BriefingResponse {
    briefing: String,
}

/// HTTP implementation talking to the configured insight gateway
pub struct InsightGateway {
    http_client: Client,
    base_url: String,
}

impl InsightGateway {
    /// Create a gateway client.
    ///
    /// Timeouts are applied per request since the three boundaries have very
    /// different latency profiles.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| Error::Config(format!("Invalid gateway API key: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        Ok(Self {
            http_client: Client::builder()
                .default_headers(headers)
                .build()
                .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        timeout: Duration,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Upstream(format!("Gateway request to /{} timed out", endpoint))
                } else {
                    Error::Upstream(format!("Gateway request to /{} failed: {}", endpoint, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    Error::Upstream(format!("Gateway rate limited /{}", endpoint))
                }
                _ => Error::Upstream(format!(
                    "Gateway /{} returned {}: {}",
                    endpoint,
                    status,
                    body.chars().take(200).collect::<String>()
                )),
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| Error::Upstream(format!("Gateway /{} response parse failed: {}", endpoint, e)))
    }
}

#[async_trait]
impl InsightBackend for InsightGateway {
    async fn extract_placements(&self, request: ExtractRequest) -> Result<PlacementStore> {
        debug!(
            session_id = %request.session_id,
            files = request.storage_paths.len(),
            "Requesting placement extraction"
        );
        let response: ExtractResponse = self
            .post_json("extract", EXTRACT_TIMEOUT, &request)
            .await?;
        Ok(response.placements)
    }

    async fn step_insight(&self, request: InsightRequest) -> Result<String> {
        debug!(
            session_id = %request.session_id,
            step = request.step_number,
            "Requesting step insight"
        );
        let response: InsightResponse = self
            .post_json("insight", INSIGHT_TIMEOUT, &request)
            .await?;
        Ok(response.ai_response)
    }

    async fn final_briefing(&self, request: BriefingRequest) -> Result<String> {
        debug!(session_id = %request.session_id, "Requesting final briefing");
        let response: BriefingResponse = self
            .post_json("briefing", BRIEFING_TIMEOUT, &request)
            .await?;
        Ok(response.briefing)
    }
}
