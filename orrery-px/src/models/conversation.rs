//! Conversation transcript entries
//!
//! One conversation row per (session, step), holding an ordered message
//! array. Entries are appended, never replaced wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved step number for the final briefing's transcript entry
pub const FINAL_BRIEFING_STEP: u32 = 999;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// What kind of exchange produced the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    MainResponse,
    StepInsight,
    Followup,
    FinalBriefing,
}

/// One transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: MessageRole,
    pub content: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    pub created_at: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn user(content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            kind: Some(kind),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            kind: Some(kind),
            created_at: Utc::now(),
        }
    }

    pub fn is_main_response(&self) -> bool {
        self.role == MessageRole::User && self.kind == Some(MessageKind::MainResponse)
    }
}
