//! Edge-triggered transitions between two authoritative snapshots.
//!
//! The reconciliation loop never acts on snapshot fields directly; it acts
//! on the before/after edges derived here, which makes re-delivery of the
//! same snapshot harmless.

use crate::domain::state::Seat;
use crate::protocol::session::{EndReason, SessionStatus, SessionView};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncTransition {
    /// The second participant appeared on the document.
    GuestJoined,
    /// Both ready flags are now set and the game has not started yet.
    BothReady,
    /// Both sides asked to cut the preview short.
    BothWantStart,
    /// The shared preview countdown was stamped.
    PreviewBegan,
    /// Turn ownership moved to this seat.
    TurnBecame { seat: Seat },
    /// Same owner, fresh start stamp (pair resolved or forced slide).
    TurnRestamped,
    /// The active player now has to pick a slide.
    SlidePhaseBegan { seat: Option<Seat> },
    SlidePhaseEnded,
    /// The document reached its terminal status.
    SessionEnded { reason: Option<EndReason> },
}

/// Derive domain transitions from before/after document views.
pub fn derive_transitions(before: &SessionView, after: &SessionView) -> Vec<SyncTransition> {
    let mut transitions = Vec::new();

    if !before.guest_present && after.guest_present {
        transitions.push(SyncTransition::GuestJoined);
    }

    if !before.both_ready && after.both_ready && !after.game_started {
        transitions.push(SyncTransition::BothReady);
    }

    // Early-start only matters while the preview is actually running.
    if !before.both_want_start
        && after.both_want_start
        && after.game_started
        && after.current_turn.is_none()
    {
        transitions.push(SyncTransition::BothWantStart);
    }

    if !before.game_started && after.game_started {
        transitions.push(SyncTransition::PreviewBegan);
    }

    if let Some(seat) = after.current_turn {
        if before.current_turn != Some(seat) {
            transitions.push(SyncTransition::TurnBecame { seat });
        } else if before.turn_started_at_ms != after.turn_started_at_ms {
            transitions.push(SyncTransition::TurnRestamped);
        }
    }

    if !before.is_selecting_move && after.is_selecting_move {
        transitions.push(SyncTransition::SlidePhaseBegan {
            seat: after.current_turn,
        });
    }
    if before.is_selecting_move && !after.is_selecting_move {
        transitions.push(SyncTransition::SlidePhaseEnded);
    }

    if before.status != SessionStatus::Ended && after.status == SessionStatus::Ended {
        transitions.push(SyncTransition::SessionEnded {
            reason: after.end_reason.clone(),
        });
    }

    transitions
}
