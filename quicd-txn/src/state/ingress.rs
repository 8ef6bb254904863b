//! Ingress state machine: legal orderings of events received from the peer.

use std::fmt;

use super::lookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngressState {
    Start,
    HeadersReceived,
    RegularBodyReceived,
    ChunkHeaderReceived,
    ChunkBodyReceived,
    ChunkCompleted,
    TrailersReceived,
    UpgradeComplete,
    /// EOM seen but not yet handed to the handler.
    EomQueued,
    ReceivingDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngressEvent {
    OnHeaders,
    OnBody,
    OnChunkHeader,
    OnChunkComplete,
    OnTrailers,
    OnUpgrade,
    OnEom,
    /// Queued EOM delivered to the handler.
    EomFlushed,
}

use IngressEvent as E;
use IngressState as S;

const TRANSITIONS: &[(IngressState, IngressEvent, IngressState)] = &[
    (S::Start, E::OnHeaders, S::HeadersReceived),
    // Interim (1xx) responses repeat the header block. The transaction
    // refuses a repeat after anything else.
    (S::HeadersReceived, E::OnHeaders, S::HeadersReceived),
    (S::HeadersReceived, E::OnBody, S::RegularBodyReceived),
    (S::HeadersReceived, E::OnChunkHeader, S::ChunkHeaderReceived),
    (S::HeadersReceived, E::OnTrailers, S::TrailersReceived),
    (S::HeadersReceived, E::OnUpgrade, S::UpgradeComplete),
    (S::HeadersReceived, E::OnEom, S::EomQueued),
    (S::RegularBodyReceived, E::OnBody, S::RegularBodyReceived),
    (S::RegularBodyReceived, E::OnTrailers, S::TrailersReceived),
    (S::RegularBodyReceived, E::OnEom, S::EomQueued),
    (S::ChunkHeaderReceived, E::OnBody, S::ChunkBodyReceived),
    (S::ChunkBodyReceived, E::OnBody, S::ChunkBodyReceived),
    (S::ChunkBodyReceived, E::OnChunkComplete, S::ChunkCompleted),
    (S::ChunkCompleted, E::OnChunkHeader, S::ChunkHeaderReceived),
    (S::ChunkCompleted, E::OnTrailers, S::TrailersReceived),
    (S::ChunkCompleted, E::OnEom, S::EomQueued),
    (S::TrailersReceived, E::OnEom, S::EomQueued),
    (S::UpgradeComplete, E::OnBody, S::UpgradeComplete),
    (S::UpgradeComplete, E::OnEom, S::EomQueued),
    (S::EomQueued, E::EomFlushed, S::ReceivingDone),
];

impl IngressState {
    /// Next state for `event`, or None if the event is not legal here.
    pub fn next(self, event: IngressEvent) -> Option<IngressState> {
        lookup(TRANSITIONS, self, event)
    }

    /// Apply `event` in place. Returns false and leaves `self` unchanged
    /// when the transition is illegal.
    pub fn transit(&mut self, event: IngressEvent) -> bool {
        match self.next(event) {
            Some(next) => {
                *self = next;
                true
            }
            None => false,
        }
    }

    pub fn can_transit(self, event: IngressEvent) -> bool {
        self.next(event).is_some()
    }

    pub fn is_terminal(self) -> bool {
        self == IngressState::ReceivingDone
    }

    /// EOM has been seen, whether or not it was delivered yet.
    pub fn is_eom_seen(self) -> bool {
        matches!(self, IngressState::EomQueued | IngressState::ReceivingDone)
    }
}

impl fmt::Display for IngressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for IngressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
