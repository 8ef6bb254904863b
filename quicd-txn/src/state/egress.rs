//! Egress state machine: legal orderings of what the handler may send.

use std::fmt;

use super::lookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EgressState {
    Start,
    HeadersSent,
    RegularBodySent,
    ChunkHeaderSent,
    ChunkBodySent,
    ChunkTerminatorSent,
    TrailersSent,
    /// EOM accepted but still behind buffered body.
    EomQueued,
    SendingDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EgressEvent {
    SendHeaders,
    SendBody,
    SendChunkHeader,
    SendChunkTerminator,
    SendTrailers,
    SendEom,
    /// Queued EOM handed to the transport.
    EomFlushed,
}

use EgressEvent as E;
use EgressState as S;

const TRANSITIONS: &[(EgressState, EgressEvent, EgressState)] = &[
    (S::Start, E::SendHeaders, S::HeadersSent),
    (S::HeadersSent, E::SendHeaders, S::HeadersSent),
    (S::HeadersSent, E::SendBody, S::RegularBodySent),
    (S::HeadersSent, E::SendChunkHeader, S::ChunkHeaderSent),
    (S::HeadersSent, E::SendTrailers, S::TrailersSent),
    (S::HeadersSent, E::SendEom, S::EomQueued),
    (S::RegularBodySent, E::SendBody, S::RegularBodySent),
    (S::RegularBodySent, E::SendTrailers, S::TrailersSent),
    (S::RegularBodySent, E::SendEom, S::EomQueued),
    (S::ChunkHeaderSent, E::SendBody, S::ChunkBodySent),
    (S::ChunkBodySent, E::SendBody, S::ChunkBodySent),
    (S::ChunkBodySent, E::SendChunkTerminator, S::ChunkTerminatorSent),
    (S::ChunkTerminatorSent, E::SendChunkHeader, S::ChunkHeaderSent),
    (S::ChunkTerminatorSent, E::SendTrailers, S::TrailersSent),
    (S::ChunkTerminatorSent, E::SendEom, S::EomQueued),
    (S::TrailersSent, E::SendEom, S::EomQueued),
    (S::EomQueued, E::EomFlushed, S::SendingDone),
];

impl EgressState {
    pub fn next(self, event: EgressEvent) -> Option<EgressState> {
        lookup(TRANSITIONS, self, event)
    }

    pub fn transit(&mut self, event: EgressEvent) -> bool {
        match self.next(event) {
            Some(next) => {
                *self = next;
                true
            }
            None => false,
        }
    }

    pub fn can_transit(self, event: EgressEvent) -> bool {
        self.next(event).is_some()
    }

    pub fn is_terminal(self) -> bool {
        self == EgressState::SendingDone
    }

    pub fn is_eom_seen(self) -> bool {
        matches!(self, EgressState::EomQueued | EgressState::SendingDone)
    }
}

impl fmt::Display for EgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for EgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_then_eom() {
        let mut state = S::Start;
        assert!(state.transit(E::SendHeaders));
        assert!(state.transit(E::SendEom));
        assert!(state.transit(E::EomFlushed));
        assert!(state.is_terminal());
        assert!(!state.can_transit(E::SendBody));
    }

    #[test]
    fn test_chunked_body() {
        let mut state = S::HeadersSent;
        for event in [
            E::SendChunkHeader,
            E::SendBody,
            E::SendBody,
            E::SendChunkTerminator,
            E::SendChunkHeader,
            E::SendBody,
            E::SendChunkTerminator,
            E::SendTrailers,
            E::SendEom,
        ] {
            assert!(state.transit(event), "{:?} rejected in {:?}", event, state);
        }
        assert_eq!(state, S::EomQueued);
    }

    #[test]
    fn test_body_before_headers_rejected() {
        assert!(!S::Start.can_transit(E::SendBody));
        assert!(!S::Start.can_transit(E::SendEom));
    }

    #[test]
    fn test_chunk_terminator_requires_body() {
        assert!(!S::ChunkHeaderSent.can_transit(E::SendChunkTerminator));
        assert!(!S::ChunkHeaderSent.can_transit(E::SendEom));
    }

    #[test]
    fn test_no_headers_after_body() {
        assert!(!S::RegularBodySent.can_transit(E::SendHeaders));
        assert!(!S::TrailersSent.can_transit(E::SendBody));
    }
}
