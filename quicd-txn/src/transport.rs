//! Connection side of a transaction.
//!
//! The transport owns the codec and the connection. Transactions call into
//! it to put their events on the wire and to query connection state. All
//! methods take `&self`: a transport is shared by every transaction on the
//! connection and keeps its own mutable state behind interior mutability.
//! A transport must not call back into a transaction from inside one of
//! these methods; it reports events through the owning session instead.

use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;
use http::HeaderMap;

use crate::error::ErrorCode;
use crate::message::{HeaderSize, HttpMessage};
use crate::priority::PriorityUpdate;
use crate::types::{CodecInfo, StreamId, TransportInfo};

/// How the transport wants an expired idle timer handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Fail this transaction only.
    AbortTransaction,
    /// The transport is handling it (for example by closing the whole
    /// connection); the transaction does nothing further.
    Handled,
}

/// Result of writing a body or EOM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EgressWrite {
    /// Bytes generated on the wire.
    pub bytes: usize,
    /// Byte events the transport registered for this stream during the
    /// write. Each one is released later through
    /// [`Transaction::decrement_pending_byte_events`](crate::Transaction::decrement_pending_byte_events).
    pub byte_events: u32,
}

impl EgressWrite {
    pub fn tracked(bytes: usize, byte_events: u32) -> Self {
        Self { bytes, byte_events }
    }
}

impl From<usize> for EgressWrite {
    fn from(bytes: usize) -> Self {
        Self {
            bytes,
            byte_events: 0,
        }
    }
}

/// Result of writing a header block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadersWrite {
    pub size: HeaderSize,
    /// Byte events registered during the write, as for [`EgressWrite`].
    pub byte_events: u32,
}

impl From<HeaderSize> for HeadersWrite {
    fn from(size: HeaderSize) -> Self {
        Self {
            size,
            byte_events: 0,
        }
    }
}

/// Notified once the connection becomes replay safe.
pub trait ReplaySafetyCallback {
    fn on_replay_safe(&self);
}

pub trait Transport {
    // ------------------------------------------------------------------
    // Ingress control
    // ------------------------------------------------------------------

    fn pause_ingress(&self, id: StreamId);

    fn resume_ingress(&self, id: StreamId);

    fn transaction_timeout(&self, id: StreamId) -> TimeoutAction;

    // ------------------------------------------------------------------
    // Egress; each returns the number of bytes generated on the wire.
    // Headers, body and EOM writes also report the byte events they
    // registered, which keep the transaction alive until they fire.
    // ------------------------------------------------------------------

    fn send_headers(&self, id: StreamId, msg: &HttpMessage, eom: bool) -> HeadersWrite;

    /// `track_last_byte` asks for a delivery event on the last byte.
    fn send_body(
        &self,
        id: StreamId,
        body: Bytes,
        eom: bool,
        track_last_byte: bool,
    ) -> EgressWrite;

    fn send_chunk_header(&self, id: StreamId, length: usize) -> usize;

    fn send_chunk_terminator(&self, id: StreamId) -> usize;

    fn send_eom(&self, id: StreamId, trailers: Option<&HeaderMap>) -> EgressWrite;

    fn send_abort(&self, id: StreamId, code: ErrorCode) -> usize;

    fn send_priority(&self, id: StreamId, pri: &PriorityUpdate) -> usize;

    fn send_window_update(&self, id: StreamId, bytes: u32) -> usize;

    /// The transaction has egress ready and wants a write slot.
    fn notify_pending_egress(&self);

    /// Change in body bytes buffered by transactions (may be negative).
    fn notify_egress_body_buffered(&self, _bytes: i64) {}

    fn notify_ingress_body_processed(&self, _bytes: u32) {}

    /// The transaction is finished; drop any per-stream state.
    fn detach(&self, id: StreamId);

    // ------------------------------------------------------------------
    // Connection info
    // ------------------------------------------------------------------

    fn local_address(&self) -> SocketAddr;

    fn peer_address(&self) -> SocketAddr;

    fn setup_transport_info(&self) -> TransportInfo;

    fn current_transport_info(&self) -> Option<TransportInfo>;

    fn codec(&self) -> CodecInfo;

    /// Connection is shutting down and will not accept new streams.
    fn is_draining(&self) -> bool;

    fn security_protocol(&self) -> Option<String> {
        None
    }

    // ------------------------------------------------------------------
    // Push and extended streams
    // ------------------------------------------------------------------

    /// Allocate a stream for a push associated with `parent`.
    fn new_pushed_stream(&self, _parent: StreamId) -> Option<StreamId> {
        None
    }

    /// Allocate a stream for an extended transaction on `control`.
    fn new_ex_stream(&self, _control: StreamId, _unidirectional: bool) -> Option<StreamId> {
        None
    }

    // ------------------------------------------------------------------
    // Unordered body access (partially reliable transports)
    // ------------------------------------------------------------------

    fn peek(&self, _id: StreamId, _visit: &mut dyn FnMut(u64, &[Bytes])) -> Result<(), ErrorCode> {
        Err(ErrorCode::InternalError)
    }

    fn consume(&self, _id: StreamId, _amount: usize) -> Result<(), ErrorCode> {
        Err(ErrorCode::InternalError)
    }

    fn skip_body_to(&self, _id: StreamId, _offset: u64) -> Result<Option<u64>, ErrorCode> {
        Err(ErrorCode::InternalError)
    }

    fn reject_body_to(&self, _id: StreamId, _offset: u64) -> Result<Option<u64>, ErrorCode> {
        Err(ErrorCode::InternalError)
    }

    fn track_egress_body_delivery(&self, _id: StreamId, _offset: u64) -> Result<(), ErrorCode> {
        Err(ErrorCode::InternalError)
    }

    // ------------------------------------------------------------------
    // Replay safety (0-RTT)
    // ------------------------------------------------------------------

    fn is_replay_safe(&self) -> bool {
        true
    }

    fn need_to_block_for_replay_safety(&self) -> bool {
        false
    }

    fn add_waiting_for_replay_safety(&self, callback: Rc<dyn ReplaySafetyCallback>) {
        callback.on_replay_safe();
    }

    fn remove_waiting_for_replay_safety(&self, _callback: &Rc<dyn ReplaySafetyCallback>) {}
}
