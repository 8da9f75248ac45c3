//! Speaker session lifecycle
//!
//! ```text
//!  Registering ──ProbeSent──► Syncing ──ClockFine──► Ready ──Admitted──► Streaming
//!       │                       ▲  │                   ▲                  │   ▲
//!       │                       │  │                   └─────Withdrawn────┤   │ LossSubsided
//!       │          ClockDesync ─┘  │                                      ▼   │
//!       └──Unreachable──► Lost ◄───┴─Unreachable──────────────────────── Degraded
//! ```
//!
//! Every state except `Lost` can also be `Removed`; `Lost` only leaves via
//! `Reregistered`.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Known endpoint, no sync exchange yet
    Registering,
    /// Probing until the clock estimate is fine
    Syncing,
    /// Synchronised, not admitted to the stream
    Ready,
    /// Receiving audio
    Streaming,
    /// Receiving audio under heavy loss
    Degraded,
    /// Gone; needs re-registration
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEvent {
    ProbeSent,
    ClockFine,
    Admitted,
    LossExceeded,
    LossSubsided,
    Unreachable,
    ClockDesync,
    Withdrawn,
    Removed,
    Reregistered,
}

impl SessionState {
    /// Apply `event`, or fail if the pair is not a legal transition
    pub fn transition(self, event: SessionEvent) -> Result<SessionState, SessionError> {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (Registering, ProbeSent) => Syncing,
            (Syncing, ClockFine) => Ready,
            (Ready, Admitted) => Streaming,
            (Streaming, LossExceeded) => Degraded,
            (Degraded, LossSubsided) => Streaming,
            (Registering | Syncing | Degraded, Unreachable) => Lost,
            (Ready | Streaming | Degraded, ClockDesync) => Syncing,
            (Streaming | Degraded, Withdrawn) => Ready,
            (Registering | Syncing | Ready | Streaming | Degraded, Removed) => Lost,
            (Lost, Reregistered) => Registering,
            (from, event) => return Err(SessionError::InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// States in which audio frames are accepted
    pub fn accepts_audio(self) -> bool {
        matches!(self, SessionState::Streaming | SessionState::Degraded)
    }

    /// States whose delay estimate shapes the fleet lookahead
    pub fn counts_for_lookahead(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Streaming | SessionState::Degraded)
    }

    pub fn is_lost(self) -> bool {
        self == SessionState::Lost
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
