//! Product experience session state machine
//!
//! The session progresses through upload -> extraction -> confirmation ->
//! stepped Q&A (optionally through a bounded follow-up sub-dialogue) ->
//! deliverable generation. The phase is a single discriminated value derived
//! deterministically from the persisted session record, and every operation
//! is validated by a pure reducer before any persistence happens, so the
//! session invariants are enforced in one place:
//!
//! - A: `current_step > 1` only with confirmed, non-empty placements
//! - B: a new upload while confirmed forces re-confirmation at step 1
//! - C: per-step follow-up counts never exceed [`MAX_FOLLOWUPS`]

use serde::Serialize;
use thiserror::Error;

use crate::models::{ProductDefinition, ProductStep, SessionRecord};

/// Upper bound on follow-up exchanges per step
pub const MAX_FOLLOWUPS: u8 = 3;

/// Session phase, derived from persisted state.
///
/// Extraction and deliverable generation are in-flight conditions guarded by
/// the per-session exclusive-operation lock rather than persisted phases; a
/// crash mid-call simply leaves the session in its last durable phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Step 1, no chart data yet: the upload manager is the active surface
    Uploading,
    /// Step 1 with uploads or draft placements: the confirmation gate is open
    Confirming,
    /// Waiting on the user's primary answer for a step
    Answering { step: u32 },
    /// Primary answer recorded; bounded follow-up sub-dialogue available
    FollowingUp { step: u32, remaining: u8 },
    /// Deliverable stored; the session is immutable apart from reset
    Complete,
}

impl SessionPhase {
    fn name(&self) -> &'static str {
        match self {
            SessionPhase::Uploading => "uploading",
            SessionPhase::Confirming => "confirming",
            SessionPhase::Answering { .. } => "answering",
            SessionPhase::FollowingUp { .. } => "following_up",
            SessionPhase::Complete => "complete",
        }
    }
}

/// Session events, one per user-visible operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    FileUploaded,
    FileRemoved { remaining_documents: usize },
    ExtractionSucceeded,
    PlacementsConfirmed,
    StepSubmitted { followup_available: bool },
    FollowUpAsked,
    ContinueRequested { has_next: bool },
    WentBack,
    DeliverableStored,
    Reset,
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::FileUploaded => "file_uploaded",
            SessionEvent::FileRemoved { .. } => "file_removed",
            SessionEvent::ExtractionSucceeded => "extraction_succeeded",
            SessionEvent::PlacementsConfirmed => "placements_confirmed",
            SessionEvent::StepSubmitted { .. } => "step_submitted",
            SessionEvent::FollowUpAsked => "follow_up_asked",
            SessionEvent::ContinueRequested { .. } => "continue_requested",
            SessionEvent::WentBack => "went_back",
            SessionEvent::DeliverableStored => "deliverable_stored",
            SessionEvent::Reset => "reset",
        }
    }
}

/// Rejected transitions
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("session is complete and immutable")]
    SessionComplete,

    #[error("no more follow-up questions available for this step")]
    FollowupsExhausted,

    #[error("already at the first step")]
    AlreadyAtFirstStep,

    #[error("operation '{event}' is not valid in phase '{phase}'")]
    InvalidPhase {
        phase: &'static str,
        event: &'static str,
    },
}

/// Pure reducer: validate an event against the current phase and return the
/// nominal next phase. Callers persist the corresponding record change and
/// re-derive the authoritative phase from storage afterwards.
pub fn transition(
    phase: SessionPhase,
    event: SessionEvent,
) -> Result<SessionPhase, TransitionError> {
    use SessionEvent::*;
    use SessionPhase::*;

    // Complete is absorbing for everything except an explicit reset.
    if phase == Complete && event != Reset {
        return Err(TransitionError::SessionComplete);
    }

    let next = match (phase, event) {
        // Any new upload re-opens the confirmation gate, including from a
        // later step (invariant B).
        (_, FileUploaded) => Confirming,

        (Confirming, FileRemoved { remaining_documents: 0 }) => Uploading,
        (current, FileRemoved { .. }) => current,

        (Confirming, ExtractionSucceeded) => Confirming,
        (Confirming, PlacementsConfirmed) => Answering { step: 2 },

        (Answering { step }, StepSubmitted { followup_available }) => {
            if followup_available {
                FollowingUp {
                    step,
                    remaining: MAX_FOLLOWUPS,
                }
            } else {
                Answering { step }
            }
        }

        (FollowingUp { step, remaining }, FollowUpAsked) => {
            if remaining == 0 {
                return Err(TransitionError::FollowupsExhausted);
            }
            FollowingUp {
                step,
                remaining: remaining - 1,
            }
        }
        (Answering { .. }, FollowUpAsked) => {
            return Err(TransitionError::FollowupsExhausted);
        }

        (Answering { step }, ContinueRequested { has_next })
        | (FollowingUp { step, .. }, ContinueRequested { has_next }) => {
            if has_next {
                Answering { step: step + 1 }
            } else {
                // Deliverable generation runs in-flight; completion becomes
                // durable via DeliverableStored.
                Answering { step }
            }
        }

        (Answering { step }, WentBack) | (FollowingUp { step, .. }, WentBack) => {
            if step <= 1 {
                return Err(TransitionError::AlreadyAtFirstStep);
            } else if step == 2 {
                Confirming
            } else {
                Answering { step: step - 1 }
            }
        }

        (Answering { .. }, DeliverableStored) | (FollowingUp { .. }, DeliverableStored) => {
            Complete
        }

        (_, Reset) => Uploading,

        (phase, event) => {
            return Err(TransitionError::InvalidPhase {
                phase: phase.name(),
                event: event.name(),
            });
        }
    };

    Ok(next)
}

/// Derive the authoritative phase from persisted state.
///
/// `has_main_response` is whether the current step's transcript already
/// contains the user's primary answer; it decides Answering vs FollowingUp
/// on resume.
pub fn derive_phase(
    session: &SessionRecord,
    product: &ProductDefinition,
    document_count: usize,
    has_main_response: bool,
) -> SessionPhase {
    if session.is_complete {
        return SessionPhase::Complete;
    }

    if session.current_step <= 1 {
        // Fresh sessions show the upload manager; anything on record (files,
        // draft placements, a prior confirmation being reviewed) opens the
        // confirmation gate instead.
        if !session.placements_confirmed && document_count == 0 && session.placements_empty() {
            return SessionPhase::Uploading;
        }
        return SessionPhase::Confirming;
    }

    let step = session.current_step;
    let used = session.followup_count(step);
    let followup_open = product
        .step(step)
        .map(|s| s.allow_followup)
        .unwrap_or(false)
        && used < MAX_FOLLOWUPS;

    if has_main_response && followup_open {
        SessionPhase::FollowingUp {
            step,
            remaining: MAX_FOLLOWUPS - used,
        }
    } else {
        SessionPhase::Answering { step }
    }
}

/// Normalization patch produced by the guard pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizePatch {
    /// Forced back to the chart intake step
    pub current_step: u32,
    pub placements_confirmed: bool,
    /// Null out the stored placements (only when they are actually empty)
    pub clear_placements: bool,
}

/// Guard pass: detect a session past step 1 without confirmed, non-empty
/// placements and produce the patch that restores invariant A. Runs on every
/// load; returns None for consistent sessions so nothing is re-persisted.
pub fn normalize(session: &SessionRecord) -> Option<NormalizePatch> {
    if session.is_complete {
        return None;
    }
    if session.current_step <= 1 {
        return None;
    }
    if session.placements_confirmed && !session.placements_empty() {
        return None;
    }

    Some(NormalizePatch {
        current_step: 1,
        placements_confirmed: false,
        // Preserve non-empty placements so the user can re-confirm instead
        // of re-uploading.
        clear_placements: session.placements.is_some() && session.placements_empty(),
    })
}

/// What a valid submission for a step consists of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    /// Upload-only step: the attached file list is the answer
    Files,
    /// Question step: free-text answer
    Text,
}

/// Local validation failures (no server round-trip involved)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please attach at least one file to continue")]
    NoFilesAttached,

    #[error("A response is required before continuing")]
    EmptyResponse,
}

/// Validate a step submission locally
pub fn validate_submission(
    step: &ProductStep,
    response: Option<&str>,
    document_count: usize,
) -> Result<SubmissionKind, ValidationError> {
    if step.is_upload_only() {
        if document_count == 0 {
            return Err(ValidationError::NoFilesAttached);
        }
        return Ok(SubmissionKind::Files);
    }

    match response {
        Some(text) if !text.trim().is_empty() => Ok(SubmissionKind::Text),
        _ => Err(ValidationError::EmptyResponse),
    }
}

/// Where an advance lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAdvance {
    Step(u32),
    GenerateDeliverable,
}

/// Compute the advance target from the current pointer
pub fn next_step(current: u32, total_steps: u32) -> StepAdvance {
    let next = current + 1;
    if next > total_steps {
        StepAdvance::GenerateDeliverable
    } else {
        StepAdvance::Step(next)
    }
}

/// Follow-ups still available for a step given the used count
pub fn followups_remaining(used: u8) -> u8 {
    MAX_FOLLOWUPS.saturating_sub(used)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_is_absorbing_except_reset() {
        for event in [
            SessionEvent::FileUploaded,
            SessionEvent::PlacementsConfirmed,
            SessionEvent::StepSubmitted {
                followup_available: false,
            },
            SessionEvent::FollowUpAsked,
            SessionEvent::ContinueRequested { has_next: true },
            SessionEvent::WentBack,
        ] {
            assert_eq!(
                transition(SessionPhase::Complete, event),
                Err(TransitionError::SessionComplete)
            );
        }
        assert_eq!(
            transition(SessionPhase::Complete, SessionEvent::Reset),
            Ok(SessionPhase::Uploading)
        );
    }

    #[test]
    fn upload_always_reopens_the_gate() {
        // Invariant B: even from a later step, a new upload forces
        // re-confirmation.
        for phase in [
            SessionPhase::Uploading,
            SessionPhase::Confirming,
            SessionPhase::Answering { step: 4 },
            SessionPhase::FollowingUp { step: 4, remaining: 2 },
        ] {
            assert_eq!(
                transition(phase, SessionEvent::FileUploaded),
                Ok(SessionPhase::Confirming)
            );
        }
    }

    #[test]
    fn removing_last_file_returns_to_upload() {
        assert_eq!(
            transition(
                SessionPhase::Confirming,
                SessionEvent::FileRemoved {
                    remaining_documents: 0
                }
            ),
            Ok(SessionPhase::Uploading)
        );
        assert_eq!(
            transition(
                SessionPhase::Confirming,
                SessionEvent::FileRemoved {
                    remaining_documents: 2
                }
            ),
            Ok(SessionPhase::Confirming)
        );
    }

    #[test]
    fn confirm_advances_past_the_gate() {
        assert_eq!(
            transition(SessionPhase::Confirming, SessionEvent::PlacementsConfirmed),
            Ok(SessionPhase::Answering { step: 2 })
        );
        // Confirming is the only phase where confirmation is legal
        assert!(transition(
            SessionPhase::Answering { step: 3 },
            SessionEvent::PlacementsConfirmed
        )
        .is_err());
    }

    #[test]
    fn extraction_only_valid_at_the_gate() {
        assert_eq!(
            transition(SessionPhase::Confirming, SessionEvent::ExtractionSucceeded),
            Ok(SessionPhase::Confirming)
        );
        assert!(transition(
            SessionPhase::Uploading,
            SessionEvent::ExtractionSucceeded
        )
        .is_err());
    }

    #[test]
    fn submit_opens_followups_when_available() {
        assert_eq!(
            transition(
                SessionPhase::Answering { step: 2 },
                SessionEvent::StepSubmitted {
                    followup_available: true
                }
            ),
            Ok(SessionPhase::FollowingUp {
                step: 2,
                remaining: MAX_FOLLOWUPS
            })
        );
        assert_eq!(
            transition(
                SessionPhase::Answering { step: 2 },
                SessionEvent::StepSubmitted {
                    followup_available: false
                }
            ),
            Ok(SessionPhase::Answering { step: 2 })
        );
    }

    #[test]
    fn followup_budget_decrements_to_exhaustion() {
        let mut phase = SessionPhase::FollowingUp {
            step: 2,
            remaining: MAX_FOLLOWUPS,
        };
        for _ in 0..MAX_FOLLOWUPS {
            phase = transition(phase, SessionEvent::FollowUpAsked).unwrap();
        }
        assert_eq!(
            phase,
            SessionPhase::FollowingUp {
                step: 2,
                remaining: 0
            }
        );
        assert_eq!(
            transition(phase, SessionEvent::FollowUpAsked),
            Err(TransitionError::FollowupsExhausted)
        );
    }

    #[test]
    fn continue_always_allowed_from_followups() {
        // The user may skip ahead regardless of remaining budget.
        assert_eq!(
            transition(
                SessionPhase::FollowingUp {
                    step: 2,
                    remaining: 2
                },
                SessionEvent::ContinueRequested { has_next: true }
            ),
            Ok(SessionPhase::Answering { step: 3 })
        );
    }

    #[test]
    fn back_is_rejected_from_first_step() {
        assert_eq!(
            transition(SessionPhase::Answering { step: 1 }, SessionEvent::WentBack),
            Err(TransitionError::AlreadyAtFirstStep)
        );
        assert_eq!(
            transition(SessionPhase::Answering { step: 2 }, SessionEvent::WentBack),
            Ok(SessionPhase::Confirming)
        );
        assert_eq!(
            transition(SessionPhase::Answering { step: 5 }, SessionEvent::WentBack),
            Ok(SessionPhase::Answering { step: 4 })
        );
    }

    #[test]
    fn next_step_triggers_generation_past_the_end() {
        assert_eq!(next_step(3, 5), StepAdvance::Step(4));
        assert_eq!(next_step(5, 5), StepAdvance::GenerateDeliverable);
    }
}
