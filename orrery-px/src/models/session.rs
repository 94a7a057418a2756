//! Product session record
//!
//! One row per user per product attempt. The persisted record is the single
//! source of truth for the step pointer, confirmation flag, placements, and
//! completion state; every state transition writes through to it before the
//! service reports the new state.

use chrono::{DateTime, Utc};
use orrery_common::PlacementStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-step recorded answer (kept alongside the conversation transcript so
/// structured consumers don't have to parse message arrays)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAnswer {
    pub answer: String,
    pub completed_at: DateTime<Utc>,
}

/// Persisted product session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_slug: String,

    /// Current step pointer (1-based)
    pub current_step: u32,
    /// Auxiliary section grouping
    pub current_section: u32,

    /// Extracted chart attributes; None until the user confirms
    pub placements: Option<PlacementStore>,
    pub placements_confirmed: bool,

    /// Per-step follow-up usage, step number -> count (0..=3)
    pub followup_counts: BTreeMap<u32, u8>,

    /// Structured per-step answers, keyed "step_N"
    pub step_data: BTreeMap<String, StepAnswer>,

    pub deliverable_content: Option<String>,
    pub deliverable_generated_at: Option<DateTime<Utc>>,
    pub is_complete: bool,
    pub completed_at: Option<DateTime<Utc>>,

    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a fresh session at step 1, nothing confirmed
    pub fn new(user_id: Uuid, product_slug: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            product_slug: product_slug.to_string(),
            current_step: 1,
            current_section: 1,
            placements: None,
            placements_confirmed: false,
            followup_counts: BTreeMap::new(),
            step_data: BTreeMap::new(),
            deliverable_content: None,
            deliverable_generated_at: None,
            is_complete: false,
            completed_at: None,
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Emptiness predicate over the stored placements (absent counts as empty)
    pub fn placements_empty(&self) -> bool {
        self.placements.as_ref().map(|p| p.is_empty()).unwrap_or(true)
    }

    /// Follow-ups already used on a step
    pub fn followup_count(&self, step: u32) -> u8 {
        self.followup_counts.get(&step).copied().unwrap_or(0)
    }

    /// Key used in the step_data map for a step number
    pub fn step_key(step: u32) -> String {
        format!("step_{}", step)
    }
}
