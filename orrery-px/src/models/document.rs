//! Uploaded document index rows
//!
//! One row per uploaded file. The blob lives in the upload store; this row
//! is the index entry the extraction service and the confirmation gate see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub step_number: u32,
    pub file_name: String,
    pub storage_path: String,
    pub file_type: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
}

impl UploadedDocument {
    pub fn new(
        user_id: Uuid,
        session_id: Uuid,
        step_number: u32,
        file_name: &str,
        storage_path: &str,
        file_type: &str,
        file_size: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            step_number,
            file_name: file_name.to_string(),
            storage_path: storage_path.to_string(),
            file_type: file_type.to_string(),
            file_size,
            created_at: Utc::now(),
        }
    }
}
