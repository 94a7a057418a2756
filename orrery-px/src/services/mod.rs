//! External collaborators and supporting services

pub mod blob_store;
pub mod insight_client;
pub mod rate_limit;

pub use blob_store::BlobStore;
pub use insight_client::{
    BriefingRequest, ExtractRequest, HistoryMessage, InsightBackend, InsightGateway, InsightRequest,
};
pub use rate_limit::SessionRateLimiter;
