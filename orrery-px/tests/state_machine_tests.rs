//! Session state machine tests
//!
//! Phase derivation, the guard/normalization pass, and submission
//! validation against the session invariants:
//! - current_step > 1 requires confirmed, non-empty placements
//! - new uploads while confirmed force re-confirmation at step 1
//! - follow-up counts are bounded at 3 per step

mod helpers;

use helpers::{sample_placements, test_product};
use orrery_common::PlacementStore;
use orrery_px::engine::{
    self, NormalizePatch, SessionPhase, StepAdvance, ValidationError, MAX_FOLLOWUPS,
};
use orrery_px::models::SessionRecord;
use uuid::Uuid;

fn fresh_session() -> SessionRecord {
    SessionRecord::new(Uuid::new_v4(), "personal-alignment")
}

fn confirmed_session_at(step: u32) -> SessionRecord {
    let mut session = fresh_session();
    session.placements = Some(sample_placements());
    session.placements_confirmed = true;
    session.current_step = step;
    session
}

// ---------------------------------------------------------------------------
// Phase derivation
// ---------------------------------------------------------------------------

#[test]
fn fresh_session_shows_upload_manager_not_gate() {
    // Given: fresh session, step 1, no uploads
    let session = fresh_session();
    let product = test_product();

    // Then: the upload manager is active, not the confirmation gate
    assert_eq!(
        engine::derive_phase(&session, &product, 0, false),
        SessionPhase::Uploading
    );
}

#[test]
fn uploaded_file_opens_the_gate() {
    let session = fresh_session();
    let product = test_product();

    assert_eq!(
        engine::derive_phase(&session, &product, 1, false),
        SessionPhase::Confirming
    );
}

#[test]
fn draft_placements_open_the_gate_without_uploads() {
    // A reset session keeps its placements; the gate shows for re-confirmation
    let mut session = fresh_session();
    session.placements = Some(sample_placements());
    let product = test_product();

    assert_eq!(
        engine::derive_phase(&session, &product, 0, false),
        SessionPhase::Confirming
    );
}

#[test]
fn confirmed_session_is_answering_its_step() {
    let session = confirmed_session_at(2);
    let product = test_product();

    assert_eq!(
        engine::derive_phase(&session, &product, 0, false),
        SessionPhase::Answering { step: 2 }
    );
}

#[test]
fn answered_followup_step_resumes_in_followup_phase() {
    let session = confirmed_session_at(2);
    let product = test_product();

    // Step 2 allows follow-ups; the main response is on record
    assert_eq!(
        engine::derive_phase(&session, &product, 0, true),
        SessionPhase::FollowingUp {
            step: 2,
            remaining: MAX_FOLLOWUPS
        }
    );
}

#[test]
fn exhausted_followups_resume_as_answering() {
    let mut session = confirmed_session_at(2);
    session.followup_counts.insert(2, MAX_FOLLOWUPS);
    let product = test_product();

    assert_eq!(
        engine::derive_phase(&session, &product, 0, true),
        SessionPhase::Answering { step: 2 }
    );
}

#[test]
fn partial_followup_budget_is_reflected() {
    let mut session = confirmed_session_at(2);
    session.followup_counts.insert(2, 2);
    let product = test_product();

    assert_eq!(
        engine::derive_phase(&session, &product, 0, true),
        SessionPhase::FollowingUp {
            step: 2,
            remaining: 1
        }
    );
}

#[test]
fn no_followup_step_never_enters_followup_phase() {
    // Step 3 has allow_followup = false
    let session = confirmed_session_at(3);
    let product = test_product();

    assert_eq!(
        engine::derive_phase(&session, &product, 0, true),
        SessionPhase::Answering { step: 3 }
    );
}

#[test]
fn complete_session_is_terminal() {
    let mut session = confirmed_session_at(3);
    session.is_complete = true;
    let product = test_product();

    assert_eq!(
        engine::derive_phase(&session, &product, 0, true),
        SessionPhase::Complete
    );
}

// ---------------------------------------------------------------------------
// Guard / normalization pass
// ---------------------------------------------------------------------------

#[test]
fn guard_ignores_consistent_sessions() {
    assert!(engine::normalize(&fresh_session()).is_none());
    assert!(engine::normalize(&confirmed_session_at(2)).is_none());
}

#[test]
fn guard_resets_unconfirmed_session_past_step_one() {
    let mut session = confirmed_session_at(3);
    session.placements_confirmed = false;

    let patch = engine::normalize(&session).expect("patch expected");
    assert_eq!(patch.current_step, 1);
    assert!(!patch.placements_confirmed);
    // Placements hold real data and are preserved
    assert!(!patch.clear_placements);
}

#[test]
fn guard_resets_confirmed_but_empty_session() {
    // confirmed=true with null placements: the inconsistent state from the
    // scenario table
    let mut session = fresh_session();
    session.placements_confirmed = true;
    session.current_step = 3;
    session.placements = None;

    let patch = engine::normalize(&session).expect("patch expected");
    assert_eq!(
        patch,
        NormalizePatch {
            current_step: 1,
            placements_confirmed: false,
            // Nothing stored, so nothing to null out
            clear_placements: false,
        }
    );
}

#[test]
fn guard_nulls_placements_only_when_actually_empty() {
    let mut session = fresh_session();
    session.placements_confirmed = true;
    session.current_step = 2;
    // Present but all-UNKNOWN store
    let mut store = PlacementStore::default();
    store.astrology.sun = Some("UNKNOWN".to_string());
    session.placements = Some(store);

    let patch = engine::normalize(&session).expect("patch expected");
    assert!(patch.clear_placements);
}

#[test]
fn guard_leaves_complete_sessions_alone() {
    let mut session = fresh_session();
    session.current_step = 4;
    session.placements_confirmed = false;
    session.is_complete = true;

    assert!(engine::normalize(&session).is_none());
}

// ---------------------------------------------------------------------------
// Submission validation
// ---------------------------------------------------------------------------

#[test]
fn upload_step_requires_files() {
    let product = test_product();
    let upload_step = product.step(1).unwrap();

    assert_eq!(
        engine::validate_submission(upload_step, None, 0),
        Err(ValidationError::NoFilesAttached)
    );
    assert!(engine::validate_submission(upload_step, None, 1).is_ok());
}

#[test]
fn question_step_requires_nonblank_text() {
    let product = test_product();
    let question_step = product.step(2).unwrap();

    assert_eq!(
        engine::validate_submission(question_step, None, 3),
        Err(ValidationError::EmptyResponse)
    );
    assert_eq!(
        engine::validate_submission(question_step, Some("   "), 3),
        Err(ValidationError::EmptyResponse)
    );
    assert!(engine::validate_submission(question_step, Some("my answer"), 0).is_ok());
}

// ---------------------------------------------------------------------------
// Advance arithmetic
// ---------------------------------------------------------------------------

#[test]
fn advance_past_last_step_generates_deliverable() {
    let product = test_product();
    let total = product.total_steps();

    assert_eq!(engine::next_step(2, total), StepAdvance::Step(3));
    assert_eq!(engine::next_step(3, total), StepAdvance::GenerateDeliverable);
}
