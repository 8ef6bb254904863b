//! Application side of a transaction.
//!
//! # Contract
//!
//! - Callbacks arrive on the connection's event-loop thread, in the order
//!   the peer's events arrived (pauses included).
//! - Each callback gets the transaction itself as `&mut Transaction`, so
//!   the handler can respond, pause or abort from inside the callback.
//! - `detach_transaction` is the last callback a handler ever receives for
//!   a given transaction.
//! - Calling an egress method the egress state machine forbids panics; it
//!   is a bug in the handler, not a peer error.

use bytes::Bytes;
use http::HeaderMap;

use crate::error::{ErrorCode, HttpError};
use crate::message::HttpMessage;
use crate::transaction::Transaction;
use crate::types::UpgradeProtocol;

/// Receives a transaction's ingress events and egress flow-control signals.
///
/// Hooks for push, extended transactions, GOAWAY and partially reliable
/// bodies have defaults, so plain request/response handlers can ignore them.
pub trait Handler {
    /// Bound to `txn`. Called once, when the handler is installed.
    fn set_transaction(&mut self, _txn: &mut Transaction) {}

    /// The transaction is finished and about to be dropped.
    fn detach_transaction(&mut self, txn: &Transaction);

    fn on_headers_complete(&mut self, txn: &mut Transaction, msg: HttpMessage);

    fn on_body(&mut self, txn: &mut Transaction, body: Bytes);

    /// Body at an explicit stream offset. Partially reliable bodies use
    /// this; the default drops the offset.
    fn on_body_with_offset(&mut self, txn: &mut Transaction, _offset: u64, body: Bytes) {
        self.on_body(txn, body);
    }

    fn on_chunk_header(&mut self, _txn: &mut Transaction, _length: usize) {}

    fn on_chunk_complete(&mut self, _txn: &mut Transaction) {}

    fn on_trailers(&mut self, txn: &mut Transaction, trailers: HeaderMap);

    fn on_eom(&mut self, txn: &mut Transaction);

    fn on_upgrade(&mut self, txn: &mut Transaction, protocol: UpgradeProtocol);

    fn on_error(&mut self, txn: &mut Transaction, error: &HttpError);

    fn on_egress_paused(&mut self, txn: &mut Transaction);

    fn on_egress_resumed(&mut self, txn: &mut Transaction);

    /// A pushed transaction arrived. Install a handler on `pushed` to accept
    /// it; leaving it without one refuses the push.
    fn on_pushed_transaction(&mut self, _txn: &mut Transaction, _pushed: &mut Transaction) {}

    /// An extended transaction arrived on this control stream. Same
    /// acceptance rule as pushes.
    fn on_ex_transaction(&mut self, _txn: &mut Transaction, _ex: &mut Transaction) {}

    fn on_goaway(&mut self, _txn: &mut Transaction, _code: ErrorCode) {}

    fn on_unframed_body_started(&mut self, _txn: &mut Transaction, _offset: u64) {}

    fn on_body_peek(&mut self, _txn: &mut Transaction, _offset: u64, _data: &[Bytes]) {}

    fn on_body_skipped(&mut self, _txn: &mut Transaction, _offset: u64) {}

    fn on_body_rejected(&mut self, _txn: &mut Transaction, _offset: u64) {}
}
