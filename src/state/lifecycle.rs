//! Session status transition table: which events an active or completed session accepts.

use thiserror::Error;

use crate::dao::models::SessionStatus;

/// Why a session leaves the active status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// Every member submitted a final score; the progress journal and the level chain advance.
    AllScoresSubmitted,
    /// Every member voted to end; nothing is recorded and no next level is created.
    AllVotedToEnd,
}

/// Events that can be applied to a session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A membership, score or vote change on a running session.
    Update,
    /// Level recalculation on a running session.
    Recalculate,
    /// The session reached one of its completion conditions.
    Complete(CompletionReason),
}

/// Error returned when an event cannot be applied from the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Status the session was in when the event was received.
    pub from: SessionStatus,
    /// Rejected event.
    pub event: SessionEvent,
}

/// Compute the status reached by applying `event` to a session currently in `from`.
///
/// Only active sessions accept events; completed and abandoned sessions are terminal.
pub fn next_status(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, InvalidTransition> {
    match (from, event) {
        (SessionStatus::Active, SessionEvent::Update | SessionEvent::Recalculate) => {
            Ok(SessionStatus::Active)
        }
        (SessionStatus::Active, SessionEvent::Complete(_)) => Ok(SessionStatus::Completed),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}

impl SessionStatus {
    /// Apply `event` to this status through the transition table.
    pub fn apply(self, event: SessionEvent) -> Result<SessionStatus, InvalidTransition> {
        next_status(self, event)
    }
}
