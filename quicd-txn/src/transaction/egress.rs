//! Egress: handler sends, buffering, and flushing to the transport.
//!
//! Body bytes are written through as soon as the send window, the rate
//! limiter and the transport allow. What cannot go out yet waits in the
//! deferred buffer; it is flushed again when the window opens, the rate
//! limit delay elapses, the transport resumes, or the transport offers a
//! write slot through [`Transaction::on_write_ready`].

use bytes::Bytes;
use http::{HeaderMap, Method};
use tracing::{debug, trace, warn};

use super::{default_abort_code, Transaction};
use crate::error::{ErrorCode, ErrorKind, HttpError};
use crate::message::{HeaderSize, HttpMessage};
use crate::rate_limit::Allowance;
use crate::state::{EgressEvent, EgressState};

impl Transaction {
    // ========================================================================
    // Handler sends
    // ========================================================================

    /// Whether `send_headers` is legal now: the state machine allows it and,
    /// downstream, no final response was sent yet.
    pub fn can_send_headers(&self) -> bool {
        self.egress_state.can_transit(EgressEvent::SendHeaders)
            && (self.is_upstream()
                || self.last_response_status == 0
                || self.extra_response_expected())
    }

    /// # Panics
    ///
    /// If headers cannot be sent in the current egress state.
    pub fn send_headers(&mut self, msg: &HttpMessage) {
        self.guarded(|txn| txn.send_headers_inner(msg, false))
    }

    pub fn send_headers_with_eom(&mut self, msg: &HttpMessage) {
        self.guarded(|txn| txn.send_headers_inner(msg, true))
    }

    /// # Panics
    ///
    /// If body is not allowed in the current egress state.
    pub fn send_body(&mut self, body: Bytes) {
        self.guarded(|txn| {
            txn.transit_egress(EgressEvent::SendBody);
            let len = body.len();
            if len == 0 {
                return;
            }
            txn.egress_body_length += len as u64;
            if let Some(expected) = txn.expected_egress_content_length {
                if txn.egress_body_length > expected {
                    warn!(
                        txn = %txn,
                        expected,
                        actual = txn.egress_body_length,
                        "egress body exceeds content-length"
                    );
                }
            }
            txn.deferred_egress.append(body);
            txn.ctx.transport.notify_egress_body_buffered(len as i64);
            trace!(txn = %txn, len, buffered = txn.deferred_egress.len(), "body submitted");
            txn.flush_egress_eagerly();
        })
    }

    /// # Panics
    ///
    /// On a partially reliable transaction, or in the wrong egress state.
    pub fn send_chunk_header(&mut self, length: usize) {
        self.guarded(|txn| {
            txn.assert_reliable("chunk header");
            txn.transit_egress(EgressEvent::SendChunkHeader);
            // Multiplexed codecs carry their own framing.
            if !txn.ctx.transport.codec().supports_parallel_requests {
                txn.deferred_egress.push_chunk(length);
            }
        })
    }

    /// # Panics
    ///
    /// On a partially reliable transaction, or in the wrong egress state.
    pub fn send_chunk_terminator(&mut self) {
        self.guarded(|txn| {
            txn.assert_reliable("chunk terminator");
            txn.transit_egress(EgressEvent::SendChunkTerminator);
        })
    }

    /// Trailers go out with the EOM.
    ///
    /// # Panics
    ///
    /// On a partially reliable transaction, or in the wrong egress state.
    pub fn send_trailers(&mut self, trailers: HeaderMap) {
        self.guarded(|txn| {
            txn.assert_reliable("trailers");
            txn.transit_egress(EgressEvent::SendTrailers);
            txn.pending_trailers = Some(trailers);
        })
    }

    /// End the message. Goes out immediately if nothing is buffered,
    /// otherwise after the last buffered byte.
    pub fn send_eom(&mut self) {
        self.guarded(|txn| {
            txn.transit_egress(EgressEvent::SendEom);
            if let Some(expected) = txn.expected_egress_content_length {
                if expected != txn.egress_body_length && !txn.flags.partially_reliable {
                    warn!(
                        txn = %txn,
                        expected,
                        actual = txn.egress_body_length,
                        "content-length does not match body sent"
                    );
                }
            }
            if txn.has_pending_eom() && !txn.flags.egress_paused {
                let nbytes = txn.send_eom_now();
                txn.byte_events.body_bytes_generated(nbytes);
            } else {
                txn.flush_egress_eagerly();
            }
        })
    }

    /// Abort with the default code for this transaction's role.
    pub fn send_abort(&mut self) {
        self.guarded(|txn| {
            let code = default_abort_code(txn);
            txn.send_abort_code(code);
        })
    }

    pub fn send_abort_with_code(&mut self, code: ErrorCode) {
        self.guarded(|txn| txn.send_abort_code(code))
    }

    // ========================================================================
    // Transport-side egress control
    // ========================================================================

    /// Transport backpressure on.
    pub fn pause_egress(&mut self) {
        self.guarded(|txn| {
            if txn.flags.egress_paused {
                trace!(txn = %txn, "egress already paused");
                return;
            }
            debug!(txn = %txn, "egress paused by transport");
            txn.flags.egress_paused = true;
            txn.update_egress_registration();
            txn.update_handler_pause_state();
        })
    }

    /// Transport backpressure off.
    pub fn resume_egress(&mut self) {
        self.guarded(|txn| {
            if !txn.flags.egress_paused {
                return;
            }
            debug!(txn = %txn, "egress resumed by transport");
            txn.flags.egress_paused = false;
            txn.flush_egress_eagerly();
        })
    }

    /// A write slot of up to `max_egress` body bytes. `ratio` is this
    /// stream's share of the slot under the current priorities. Returns
    /// whether the transaction still wants to write.
    pub fn on_write_ready(&mut self, max_egress: usize, ratio: f64) -> bool {
        self.guarded(|txn| {
            txn.priority_summary.cumulative_ratio += ratio;
            txn.priority_summary.egress_calls += 1;
            txn.flush_egress(max_egress);
            txn.flags.enqueued
        })
    }

    /// The peer granted `amount` more bytes of send window.
    pub fn on_ingress_window_update(&mut self, amount: u32) {
        self.guarded(|txn| {
            if !txn.flags.use_flow_control {
                return;
            }
            trace!(txn = %txn, amount, "remote side granted window");
            if let Err(e) = txn.send_window.grant(amount) {
                warn!(txn = %txn, error = %e, "send window update rejected");
                txn.handle_error(
                    HttpError::both(ErrorKind::FlowControl, e.to_string())
                        .with_codec_code(ErrorCode::FlowControlError),
                );
                return;
            }
            txn.update_read_timeout();
            txn.flush_egress_eagerly();
        })
    }

    /// The peer changed its initial stream window.
    pub fn on_ingress_set_send_window(&mut self, capacity: u32) {
        self.guarded(|txn| {
            if !txn.flags.use_flow_control {
                return;
            }
            if let Err(e) = txn.send_window.set_capacity(capacity) {
                warn!(txn = %txn, error = %e, "send window capacity not changed");
                return;
            }
            txn.update_read_timeout();
            txn.flush_egress_eagerly();
        })
    }

    /// Pace egress at `bits_per_second`; 0 removes the limit.
    pub fn set_egress_rate_limit(&mut self, bits_per_second: u64) {
        self.guarded(|txn| {
            let now = txn.ctx.clock.now();
            if bits_per_second > 0 && bits_per_second < 8000 {
                warn!(
                    txn = %txn,
                    bits_per_second,
                    "rate limit below 8000 bps, pacing at 1 byte/ms"
                );
            }
            txn.rate_limiter.set_limit(bits_per_second, now);
            txn.flush_egress_eagerly();
        })
    }

    // ========================================================================
    // Partial reliability
    // ========================================================================

    /// Skip egress body forward to `offset`. Buffered bytes below it are
    /// dropped (without flow control only) and the peer is told.
    pub fn skip_body_to(&mut self, offset: u64) -> Result<Option<u64>, ErrorCode> {
        self.guarded(|txn| {
            if !txn.flags.partially_reliable {
                warn!(txn = %txn, "skip_body_to on a reliable transaction");
                return Err(ErrorCode::ProtocolError);
            }
            if !txn.flags.egress_headers_delivered {
                warn!(txn = %txn, "skip_body_to before headers were delivered");
                return Err(ErrorCode::ProtocolError);
            }
            if offset > txn.egress_body_length {
                txn.egress_body_length = offset;
            }
            txn.trim_deferred_egress_body(offset);
            txn.ctx.transport.skip_body_to(txn.id, offset)
        })
    }

    pub fn set_body_last_byte_delivery_tracking_enabled(
        &mut self,
        enabled: bool,
    ) -> Result<(), ErrorCode> {
        if !self.flags.partially_reliable {
            return Err(ErrorCode::ProtocolError);
        }
        self.flags.track_last_byte_delivery = enabled;
        Ok(())
    }

    /// Ask for a delivery event once the peer acknowledges body byte `offset`.
    pub fn track_egress_body_delivery(&mut self, offset: u64) -> Result<(), ErrorCode> {
        if !self.flags.partially_reliable {
            return Err(ErrorCode::ProtocolError);
        }
        self.ctx.transport.track_egress_body_delivery(self.id, offset)
    }

    pub fn has_pending_body(&self) -> bool {
        !self.deferred_egress.is_empty() || self.deferred_egress.has_chunks()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn transit_egress(&mut self, event: EgressEvent) {
        let from = self.egress_state;
        if !self.egress_state.transit(event) {
            panic!(
                "invalid egress transition: {:?} in state {} on stream {}",
                event, from, self.id
            );
        }
    }

    fn assert_reliable(&self, what: &str) {
        if self.flags.partially_reliable {
            panic!(
                "{} cannot be sent on partially reliable stream {}",
                what, self.id
            );
        }
    }

    fn send_headers_inner(&mut self, msg: &HttpMessage, eom: bool) {
        assert!(
            self.can_send_headers(),
            "headers cannot be sent on stream {} in state {} (last status {})",
            self.id,
            self.egress_state,
            self.last_response_status
        );
        self.transit_egress(EgressEvent::SendHeaders);

        if msg.is_response() && !self.is_pushed() {
            self.last_response_status = msg.status_code();
        }
        if msg.is_request() {
            self.flags.head_request = msg.method() == Some(&Method::HEAD);
        }
        if msg.is_response() && !self.flags.head_request {
            self.expected_egress_content_length = msg.content_length();
        }
        if msg.partially_reliable {
            self.flags.partially_reliable = true;
        }

        let write = self.ctx.transport.send_headers(self.id, msg, eom);
        self.register_byte_events(write.byte_events);
        debug!(txn = %self, eom, compressed = write.size.compressed, "headers sent");
        self.byte_events.header_bytes_generated(write.size);

        if eom {
            self.transit_egress(EgressEvent::SendEom);
            self.transit_egress(EgressEvent::EomFlushed);
            self.on_egress_finished();
        }
        // Upstream window updates wait until the request went out.
        self.flush_window_update();
        self.update_read_timeout();
    }

    pub(super) fn send_abort_code(&mut self, code: ErrorCode) {
        self.mark_ingress_complete();
        self.mark_egress_complete();
        if self.flags.aborted {
            trace!(txn = %self, "already aborted");
            return;
        }
        self.flags.aborted = true;
        debug!(txn = %self, %code, "sending abort");
        let nbytes = self.ctx.transport.send_abort(self.id, code);
        self.byte_events.header_bytes_generated(HeaderSize {
            compressed: nbytes as u64,
            uncompressed: 0,
        });
    }

    pub(super) fn mark_egress_complete(&mut self) {
        let dropped = self.deferred_egress.clear();
        if dropped > 0 {
            self.ctx.transport.notify_egress_body_buffered(-(dropped as i64));
        }
        self.pending_trailers = None;
        self.egress_state = EgressState::SendingDone;
        self.on_egress_finished();
    }

    fn on_egress_finished(&mut self) {
        self.dequeue();
        self.rate_limiter.cancel();
    }

    /// EOM queued with nothing left in front of it.
    fn has_pending_eom(&self) -> bool {
        self.egress_state == EgressState::EomQueued
            && self.deferred_egress.is_empty()
            && !self.deferred_egress.has_chunks()
    }

    /// Flush without a write-slot limit unless the transport is paused.
    pub(super) fn flush_egress_eagerly(&mut self) {
        if self.flags.egress_paused {
            self.update_egress_registration();
            self.update_handler_pause_state();
        } else {
            self.flush_egress(usize::MAX);
        }
    }

    /// Send as much buffered egress as window, rate limit and `max` allow.
    pub(super) fn flush_egress(&mut self, max: usize) -> usize {
        if self.is_egress_complete() {
            return 0;
        }
        let had_buffer = !self.deferred_egress.is_empty();

        let mut budget = self.deferred_egress.len().min(max);
        if self.flags.use_flow_control {
            budget = budget.min(self.send_window.size() as usize);
        }
        if budget > 0 {
            let now = self.ctx.clock.now();
            match self.rate_limiter.allowance(now, budget as u64) {
                Allowance::Unlimited => {}
                Allowance::Bytes(allowed) => {
                    budget = budget.min(usize::try_from(allowed).unwrap_or(usize::MAX));
                }
                Allowance::Delayed(at) => {
                    trace!(txn = %self, resume_at = ?at, "egress rate limited");
                    budget = 0;
                }
            }
        }

        let mut nbytes = 0;
        if budget > 0 || self.has_pending_eom() {
            nbytes = self.send_deferred_body(budget);
        }
        if self.deferred_egress.is_empty() {
            self.rate_limiter.on_idle();
            if had_buffer {
                self.byte_events.on_egress_buffer_empty();
            }
        }

        // A closed window after the ingress EOM arms the write timeout.
        if self.idle_deadline.is_none() && self.is_expecting_ingress() {
            self.refresh_timeout();
        }

        self.update_egress_registration();
        self.update_handler_pause_state();
        nbytes
    }

    fn send_deferred_body(&mut self, max: usize) -> usize {
        let mut nbytes = 0;
        if !self.deferred_egress.has_chunks() {
            let body = self.deferred_egress.split_to(max);
            let eom = self.has_pending_eom();
            if !body.is_empty() {
                nbytes += self.send_body_now(body, eom);
            } else if eom {
                nbytes += self.send_eom_now();
            }
            return nbytes;
        }

        // Serial codec with explicit chunks: header once, body, terminator
        // when the declared length is exhausted.
        let mut can_send = max;
        while can_send > 0 {
            let Some(chunk) = self.deferred_egress.front_chunk_mut() else {
                break;
            };
            let remaining = chunk.remaining;
            let header_sent = std::mem::replace(&mut chunk.header_sent, true);
            if !header_sent {
                nbytes += self.ctx.transport.send_chunk_header(self.id, remaining);
            }
            if remaining == 0 {
                nbytes += self.ctx.transport.send_chunk_terminator(self.id);
                self.deferred_egress.pop_chunk();
                continue;
            }

            let body = self.deferred_egress.split_to(remaining.min(can_send));
            let sent = body.len();
            if sent == 0 {
                // The handler has not supplied this chunk's bytes yet.
                break;
            }
            nbytes += self.send_body_now(body, false);
            can_send -= sent;

            let done = match self.deferred_egress.front_chunk_mut() {
                Some(chunk) => {
                    chunk.remaining -= sent;
                    chunk.remaining == 0
                }
                None => false,
            };
            if done {
                nbytes += self.ctx.transport.send_chunk_terminator(self.id);
                self.deferred_egress.pop_chunk();
            }
        }
        if self.has_pending_eom() {
            nbytes += self.send_eom_now();
        }
        nbytes
    }

    fn send_body_now(&mut self, body: Bytes, eom: bool) -> usize {
        let len = body.len();
        if self.flags.use_flow_control {
            let reserved = u32::try_from(len)
                .map_err(|_| ())
                .and_then(|n| self.send_window.reserve(n).map_err(|_| ()));
            if reserved.is_err() {
                warn!(txn = %self, len, "body sent beyond the send window");
            }
        }
        let eom_on_body = eom && self.pending_trailers.is_none();
        let track_last_byte = eom_on_body && self.flags.track_last_byte_delivery;

        trace!(txn = %self, len, eom = eom_on_body, "sending body");
        let write = self
            .ctx
            .transport
            .send_body(self.id, body, eom_on_body, track_last_byte);
        self.register_byte_events(write.byte_events);
        let mut nbytes = write.bytes;
        self.egress_body_committed += len as u64;
        self.rate_limiter.on_bytes_sent(len as u64);
        self.ctx.transport.notify_egress_body_buffered(-(len as i64));
        self.byte_events.body_bytes_generated(nbytes);

        if eom_on_body {
            self.transit_egress(EgressEvent::EomFlushed);
            self.on_egress_finished();
            self.update_read_timeout();
        } else if eom {
            nbytes += self.send_eom_now();
        }
        nbytes
    }

    fn send_eom_now(&mut self) -> usize {
        let trailers = self.pending_trailers.take();
        debug!(txn = %self, trailers = trailers.is_some(), "egress EOM");
        let write = self.ctx.transport.send_eom(self.id, trailers.as_ref());
        self.register_byte_events(write.byte_events);
        let nbytes = write.bytes;
        self.transit_egress(EgressEvent::EomFlushed);
        self.on_egress_finished();
        // After the EOM so a transport read it triggers is expected.
        self.update_read_timeout();
        nbytes
    }

    /// Keep the transaction in the egress queue only while it has work it
    /// could send right now.
    pub(super) fn update_egress_registration(&mut self) {
        if self.is_egress_complete() {
            self.dequeue();
            return;
        }
        let has_work = !self.deferred_egress.is_empty() || self.has_pending_eom();
        let window_closed = self.flags.use_flow_control
            && self.send_window.size() == 0
            && !self.deferred_egress.is_empty();

        if has_work && !self.deferred_egress.is_empty() && !window_closed {
            // Arms the resume timer if the budget is spent.
            let now = self.ctx.clock.now();
            let pending = self.deferred_egress.len() as u64;
            self.rate_limiter.allowance(now, pending);
        }

        let blocked = self.flags.egress_paused || window_closed || self.rate_limiter.is_delayed();
        if has_work && !blocked {
            self.enqueue();
        } else {
            self.dequeue();
        }
    }

    /// Report pause/resume to the handler on edges of
    /// `transport paused || window smaller than the buffered body`.
    pub(super) fn update_handler_pause_state(&mut self) {
        if self.in_callback {
            self.flags.pause_state_dirty = true;
            return;
        }
        self.flags.pause_state_dirty = false;

        let available = self.send_window.size() as i64 - self.deferred_egress.len() as i64;
        self.flags.flow_control_paused = self.flags.use_flow_control && available < 0;
        let should_pause = self.flags.egress_paused || self.flags.flow_control_paused;

        if should_pause == self.flags.handler_egress_paused
            || self.is_egress_complete()
            || self.handler.is_none()
        {
            return;
        }
        self.flags.handler_egress_paused = should_pause;
        if should_pause {
            debug!(txn = %self, available, "egress paused");
            self.with_handler(|h, t| h.on_egress_paused(t));
        } else {
            debug!(txn = %self, "egress resumed");
            self.with_handler(|h, t| h.on_egress_resumed(t));
        }
    }

    fn trim_deferred_egress_body(&mut self, offset: u64) {
        if self.flags.use_flow_control {
            // Buffered bytes already count against the peer's window.
            trace!(txn = %self, "not trimming deferred body under flow control");
            return;
        }
        if offset <= self.egress_body_committed {
            return;
        }
        let want = usize::try_from(offset - self.egress_body_committed).unwrap_or(usize::MAX);
        let trimmed = self.deferred_egress.trim_front(want);
        if trimmed == 0 {
            return;
        }
        self.egress_body_committed += trimmed as u64;
        self.ctx.transport.notify_egress_body_buffered(-(trimmed as i64));
        trace!(txn = %self, trimmed, offset, "trimmed deferred body");
        if self.deferred_egress.is_empty() {
            self.rate_limiter.on_idle();
            self.byte_events.on_egress_buffer_empty();
        }
        self.update_egress_registration();
    }
}
