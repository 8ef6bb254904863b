//! Table-driven state machines for the two halves of a transaction.
//!
//! Both machines are pure lookups over a fixed `(state, event) -> state`
//! table. They know nothing about wire formats, so the same tables serve
//! HTTP/1.1, HTTP/2 and HTTP/3 framings.

pub mod egress;
pub mod ingress;

pub use egress::{EgressEvent, EgressState};
pub use ingress::{IngressEvent, IngressState};

/// Look up `(state, event)` in a transition table.
pub(crate) fn lookup<S, E>(table: &[(S, E, S)], state: S, event: E) -> Option<S>
where
    S: Copy + PartialEq,
    E: Copy + PartialEq,
{
    table
        .iter()
        .find(|(from, on, _)| *from == state && *on == event)
        .map(|(_, _, to)| *to)
}
