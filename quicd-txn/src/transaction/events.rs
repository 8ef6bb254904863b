//! Byte events reported by the transport, and the pending-event counter
//! that keeps a transaction alive until they arrive.

use std::time::Duration;

use tracing::trace;

use super::Transaction;
use crate::byte_events::ByteEvent;

impl Transaction {
    pub fn on_egress_header_first_byte(&mut self) {
        self.guarded(|txn| {
            let now = txn.ctx.clock.now();
            txn.byte_events.on_first_header_byte(now);
        })
    }

    pub fn on_egress_body_first_byte(&mut self) {
        self.guarded(|txn| {
            let now = txn.ctx.clock.now();
            txn.byte_events.on_first_body_byte(now);
        })
    }

    pub fn on_egress_body_last_byte(&mut self) {
        self.guarded(|txn| {
            let now = txn.ctx.clock.now();
            trace!(txn = %txn, "last body byte flushed");
            txn.byte_events.on_last_byte(now);
        })
    }

    pub fn on_egress_tracked_byte(&mut self) {
        self.guarded(|txn| txn.byte_events.on_tracked_byte())
    }

    pub fn on_egress_last_byte_ack(&mut self, latency: Duration) {
        self.guarded(|txn| {
            trace!(txn = %txn, latency_ms = latency.as_millis() as u64, "last byte acked");
            txn.byte_events.on_last_byte_acked(latency);
        })
    }

    pub fn on_egress_tracked_byte_event_tx(&mut self, event: &ByteEvent) {
        self.guarded(|txn| txn.byte_events.on_tracked_event_tx(event))
    }

    pub fn on_egress_tracked_byte_event_ack(&mut self, event: &ByteEvent) {
        self.guarded(|txn| txn.byte_events.on_tracked_event_ack(event))
    }

    /// The peer acknowledged the last header byte. Enables `skip_body_to`.
    pub fn on_last_egress_header_byte_acked(&mut self) {
        self.guarded(|txn| {
            txn.flags.egress_headers_delivered = true;
            txn.byte_events.on_last_header_byte_acked();
        })
    }

    pub fn on_egress_body_bytes_acked(&mut self, offset: u64) {
        self.guarded(|txn| txn.byte_events.on_body_delivered(offset))
    }

    pub fn on_egress_body_delivery_cancelled(&mut self, offset: u64) {
        self.guarded(|txn| txn.byte_events.on_body_delivery_cancelled(offset))
    }

    /// Count byte events the transport registered while writing.
    pub(super) fn register_byte_events(&mut self, count: u32) {
        if count > 0 {
            trace!(txn = %self, count, "byte events registered by transport");
            self.byte_events.add_pending(count);
        }
    }

    /// Someone registered interest in a future byte event.
    pub fn increment_pending_byte_events(&mut self) {
        self.byte_events.increment_pending();
    }

    /// A registered byte event fired or was cancelled. May finalize.
    pub fn decrement_pending_byte_events(&mut self) {
        self.guarded(|txn| {
            txn.byte_events.decrement_pending();
        })
    }
}
