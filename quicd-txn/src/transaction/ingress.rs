//! Ingress: events from the transport, queued or delivered to the handler.

use bytes::Bytes;
use http::{HeaderMap, Method};
use tracing::{debug, error, trace, warn};

use super::Transaction;
use crate::deferred::QueuedIngress;
use crate::error::{Direction, ErrorCode, ErrorKind, HttpError};
use crate::message::HttpMessage;
use crate::state::{IngressEvent, IngressState};
use crate::transport::TimeoutAction;
use crate::types::{TransportDirection, UpgradeProtocol};

impl Transaction {
    // ========================================================================
    // Events from the transport
    // ========================================================================

    pub fn on_ingress_headers_complete(&mut self, msg: HttpMessage) {
        self.guarded(|txn| {
            let upstream_response = txn.is_upstream() && !txn.is_pushed();
            // Only a 1xx response may be followed by another header block.
            let after_interim = upstream_response && txn.extra_response_expected();
            if txn.ingress_state == IngressState::HeadersReceived && !after_interim {
                txn.reject_ingress(IngressEvent::OnHeaders);
                return;
            }
            if upstream_response && msg.is_response() {
                txn.last_response_status = msg.status_code();
            }
            if !txn.validate_ingress(IngressEvent::OnHeaders) {
                return;
            }
            if msg.is_request() {
                txn.flags.head_request = msg.method() == Some(&Method::HEAD);
            }
            if msg.may_have_body(txn.flags.head_request) {
                txn.expected_ingress_content_length = msg.content_length();
            }
            txn.byte_events.header_bytes_received(msg.ingress_header_size);
            if txn.must_queue_ingress() {
                txn.queue_ingress(QueuedIngress::Headers(msg));
            } else {
                txn.process_ingress_headers(msg);
            }
        })
    }

    /// Body bytes. `padding` counts against the receive window but is
    /// acknowledged immediately.
    pub fn on_ingress_body(&mut self, data: Bytes, padding: u16) {
        self.guarded(|txn| {
            if txn.is_ingress_eom_seen() {
                if txn.should_notify_ex_txn_error(Direction::Ingress) {
                    txn.handle_error(
                        HttpError::ingress(ErrorKind::Read, "body after ingress closed")
                            .with_codec_code(ErrorCode::StreamClosed),
                    );
                }
                return;
            }
            let len = data.len();
            if len == 0 {
                return;
            }
            if !txn.validate_ingress(IngressEvent::OnBody) {
                return;
            }
            txn.byte_events.body_bytes_received(len);
            if !txn.update_content_length_remaining(len as u64) {
                return;
            }

            if txn.flags.use_flow_control {
                let reserved = u32::try_from(len + padding as usize)
                    .map_err(|_| ())
                    .and_then(|n| txn.recv_window.reserve(n).map_err(|_| ()));
                if reserved.is_err() {
                    error!(
                        txn = %txn,
                        len,
                        padding,
                        capacity = txn.recv_window.capacity(),
                        consumed = txn.recv_window.consumed(),
                        "receive window exceeded"
                    );
                    txn.handle_error(
                        HttpError::both(ErrorKind::FlowControl, "receive window exceeded")
                            .with_codec_code(ErrorCode::FlowControlError),
                    );
                    return;
                }
                if padding > 0 {
                    let _ = txn.recv_window.free(padding as u32);
                    txn.recv_to_ack.record(padding as u32);
                }
            }

            if txn.must_queue_ingress() {
                txn.queue_ingress(QueuedIngress::Body(data));
            } else {
                txn.release_recv_window(len);
                txn.process_ingress_body(data);
            }
        })
    }

    pub fn on_ingress_chunk_header(&mut self, length: usize) {
        self.guarded(|txn| {
            if !txn.validate_ingress(IngressEvent::OnChunkHeader) {
                return;
            }
            if txn.must_queue_ingress() {
                txn.queue_ingress(QueuedIngress::ChunkHeader(length));
            } else {
                txn.process_ingress_chunk_header(length);
            }
        })
    }

    pub fn on_ingress_chunk_complete(&mut self) {
        self.guarded(|txn| {
            if !txn.validate_ingress(IngressEvent::OnChunkComplete) {
                return;
            }
            if txn.must_queue_ingress() {
                txn.queue_ingress(QueuedIngress::ChunkComplete);
            } else {
                txn.process_ingress_chunk_complete();
            }
        })
    }

    pub fn on_ingress_trailers(&mut self, trailers: HeaderMap) {
        self.guarded(|txn| {
            if !txn.validate_ingress(IngressEvent::OnTrailers) {
                return;
            }
            if txn.must_queue_ingress() {
                txn.queue_ingress(QueuedIngress::Trailers(trailers));
            } else {
                txn.process_ingress_trailers(trailers);
            }
        })
    }

    pub fn on_ingress_upgrade(&mut self, protocol: UpgradeProtocol) {
        self.guarded(|txn| {
            if !txn.validate_ingress(IngressEvent::OnUpgrade) {
                return;
            }
            if txn.must_queue_ingress() {
                txn.queue_ingress(QueuedIngress::Upgrade(protocol));
            } else {
                txn.process_ingress_upgrade(protocol);
            }
        })
    }

    pub fn on_ingress_eom(&mut self) {
        self.guarded(|txn| {
            if txn.is_ingress_eom_seen() {
                warn!(txn = %txn, "duplicate ingress EOM");
                txn.send_abort_code(ErrorCode::StreamClosed);
                return;
            }
            if txn.expected_ingress_content_length.unwrap_or(0) > 0 {
                let remaining = txn.expected_ingress_content_length.unwrap_or(0);
                txn.handle_error(HttpError::ingress(
                    ErrorKind::ParseBody,
                    format!("EOM with {} content-length bytes outstanding", remaining),
                ));
                return;
            }
            if txn.is_upstream() && txn.extra_response_expected() {
                // Interim response; the final one follows on this stream.
                trace!(txn = %txn, "ignoring EOM after interim response");
                return;
            }
            if !txn.validate_ingress(IngressEvent::OnEom) {
                return;
            }
            if txn.must_queue_ingress() {
                txn.queue_ingress(QueuedIngress::Eom);
            } else {
                txn.process_ingress_eom();
            }
        })
    }

    /// Error reported by the transport or codec. Errors are never queued
    /// behind paused ingress.
    pub fn on_error(&mut self, error: HttpError) {
        self.guarded(|txn| txn.handle_error(error))
    }

    pub fn on_goaway(&mut self, code: ErrorCode) {
        self.guarded(|txn| {
            debug!(txn = %txn, %code, "GOAWAY received");
            txn.with_handler(|h, t| h.on_goaway(t, code));
        })
    }

    // ------------------------------------------------------------------
    // Unordered bodies
    // ------------------------------------------------------------------

    /// The body switched to unframed, partially reliable delivery.
    pub fn on_ingress_unframed_body_started(&mut self, offset: u64) {
        self.guarded(|txn| {
            txn.flags.partially_reliable = true;
            txn.ingress_body_offset = offset;
            txn.with_handler(|h, t| h.on_unframed_body_started(t, offset));
        })
    }

    pub fn on_ingress_body_peek(&mut self, offset: u64, data: &[Bytes]) {
        self.guarded(|txn| {
            txn.with_handler(|h, t| h.on_body_peek(t, offset, data));
        })
    }

    /// The peer skipped its body ahead to `offset`.
    pub fn on_ingress_body_skipped(&mut self, offset: u64) {
        self.guarded(|txn| {
            if !txn.flags.partially_reliable {
                warn!(txn = %txn, offset, "body skip on a reliable transaction");
                return;
            }
            txn.advance_ingress_offset(offset);
            txn.with_handler(|h, t| h.on_body_skipped(t, offset));
        })
    }

    /// The peer will not accept egress body below `offset`.
    pub fn on_ingress_body_rejected(&mut self, offset: u64) {
        self.guarded(|txn| {
            if !txn.flags.partially_reliable {
                warn!(txn = %txn, offset, "body reject on a reliable transaction");
                return;
            }
            if offset > txn.egress_body_length {
                txn.egress_body_length = offset;
            }
            txn.with_handler(|h, t| h.on_body_rejected(t, offset));
        })
    }

    // ========================================================================
    // Handler-side ingress control
    // ========================================================================

    pub fn pause_ingress(&mut self) {
        self.guarded(|txn| {
            if txn.flags.ingress_paused {
                return;
            }
            trace!(txn = %txn, "pausing ingress");
            txn.flags.ingress_paused = true;
            txn.idle_deadline = None;
            txn.ctx.transport.pause_ingress(txn.id);
        })
    }

    /// Resume delivery, draining queued events in arrival order. The drain
    /// stops early if the handler pauses again.
    pub fn resume_ingress(&mut self) {
        self.guarded(|txn| {
            if !txn.flags.ingress_paused || txn.is_ingress_complete() {
                return;
            }
            trace!(txn = %txn, queued = txn.deferred_ingress.len(), "resuming ingress");
            txn.flags.ingress_paused = false;
            txn.ctx.transport.resume_ingress(txn.id);
            if txn.in_callback {
                txn.flags.drain_pending = true;
            } else {
                txn.drain_deferred_ingress();
            }
        })
    }

    /// Grow the receive window. Shrinking is refused.
    pub fn set_receive_window(&mut self, capacity: u32) {
        self.guarded(|txn| {
            if !txn.flags.use_flow_control {
                return;
            }
            let current = txn.recv_window.capacity();
            if capacity < current {
                warn!(txn = %txn, current, capacity, "refusing to shrink receive window");
                return;
            }
            if capacity == current {
                return;
            }
            if let Err(e) = txn.recv_window.set_capacity(capacity) {
                warn!(txn = %txn, error = %e, "receive window not changed");
                return;
            }
            txn.recv_to_ack.record(capacity - current);
            txn.flush_window_update();
        })
    }

    /// Reinitialize flow control, typically after a protocol upgrade.
    pub fn reset_flow_control(
        &mut self,
        use_flow_control: bool,
        receive_initial_window: u32,
        receive_stream_window: u32,
        send_initial_window: u32,
    ) {
        self.guarded(|txn| {
            txn.flags.use_flow_control = use_flow_control;
            txn.recv_window = crate::flow_control::Window::new(receive_initial_window);
            txn.send_window = crate::flow_control::Window::new(send_initial_window);
            txn.recv_to_ack = crate::flow_control::WindowUpdateTracker::new();
            debug!(
                txn = %txn,
                use_flow_control,
                receive_initial_window,
                receive_stream_window,
                send_initial_window,
                "flow control reset"
            );
            if use_flow_control && receive_stream_window > receive_initial_window {
                if txn.recv_window.set_capacity(receive_stream_window).is_ok() {
                    txn.recv_to_ack.record(receive_stream_window - receive_initial_window);
                    txn.flush_window_update();
                }
            }
            txn.update_handler_pause_state();
        })
    }

    /// Let `visit` look at buffered, not yet consumed body data.
    pub fn peek(&self, visit: &mut dyn FnMut(u64, &[Bytes])) -> Result<(), ErrorCode> {
        self.ctx.transport.peek(self.id, visit)
    }

    pub fn consume(&self, amount: usize) -> Result<(), ErrorCode> {
        self.ctx.transport.consume(self.id, amount)
    }

    /// Refuse body data below `offset`. Returns the offset the transport
    /// settled on, if it reports one.
    pub fn reject_body_to(&mut self, offset: u64) -> Result<Option<u64>, ErrorCode> {
        self.guarded(|txn| {
            if !txn.flags.partially_reliable {
                warn!(txn = %txn, "reject_body_to on a reliable transaction");
                return Err(ErrorCode::ProtocolError);
            }
            if txn.ingress_state == IngressState::Start {
                warn!(txn = %txn, "reject_body_to before ingress headers");
                return Err(ErrorCode::ProtocolError);
            }
            txn.advance_ingress_offset(offset);
            txn.ctx.transport.reject_body_to(txn.id, offset)
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn must_queue_ingress(&self) -> bool {
        self.flags.ingress_paused || !self.deferred_ingress.is_empty()
    }

    fn validate_ingress(&mut self, event: IngressEvent) -> bool {
        if self.ingress_state.transit(event) {
            return true;
        }
        self.reject_ingress(event);
        false
    }

    fn reject_ingress(&mut self, event: IngressEvent) {
        warn!(
            stream_id = %self.id,
            state = %self.ingress_state,
            ?event,
            "invalid ingress state transition"
        );
        let message = format!(
            "invalid ingress state transition, state={}, event={:?}, stream={}",
            self.ingress_state, event, self.id
        );
        self.handle_error(
            HttpError::both(ErrorKind::IngressStateTransition, message)
                .with_codec_code(ErrorCode::ProtocolError),
        );
    }

    fn queue_ingress(&mut self, event: QueuedIngress) {
        let name = event.name();
        if let Err(full) = self.deferred_ingress.push(event) {
            error!(txn = %self, limit = full.limit, "deferred ingress queue overflow");
            self.handle_error(
                HttpError::both(
                    ErrorKind::DeferredIngressOverflow,
                    format!("more than {} ingress events queued", full.limit),
                )
                .with_codec_code(ErrorCode::EnhanceYourCalm),
            );
            return;
        }
        trace!(txn = %self, event = name, queued = self.deferred_ingress.len(), "ingress queued");
    }

    fn release_recv_window(&mut self, len: usize) {
        if !self.flags.use_flow_control {
            return;
        }
        let released = u32::try_from(len)
            .map_err(|_| ())
            .and_then(|n| self.recv_window.free(n).map_err(|_| ()));
        if released.is_err() {
            warn!(txn = %self, len, "receive window release failed");
        }
    }

    pub(super) fn drain_deferred_ingress(&mut self) {
        if self.flags.in_resume {
            // The outer loop picks up where it left off.
            return;
        }
        self.flags.in_resume = true;
        while !self.flags.ingress_paused {
            let Some(event) = self.deferred_ingress.pop() else {
                break;
            };
            trace!(txn = %self, event = event.name(), "delivering deferred ingress");
            match event {
                QueuedIngress::Headers(msg) => self.process_ingress_headers(msg),
                QueuedIngress::Body(data) => {
                    self.release_recv_window(data.len());
                    self.process_ingress_body(data);
                }
                QueuedIngress::ChunkHeader(length) => self.process_ingress_chunk_header(length),
                QueuedIngress::ChunkComplete => self.process_ingress_chunk_complete(),
                QueuedIngress::Trailers(trailers) => self.process_ingress_trailers(trailers),
                QueuedIngress::Upgrade(protocol) => self.process_ingress_upgrade(protocol),
                QueuedIngress::Eom => self.process_ingress_eom(),
            }
        }
        self.flags.in_resume = false;
        self.update_read_timeout();
    }

    fn process_ingress_headers(&mut self, msg: HttpMessage) {
        if self.flags.aborted {
            return;
        }
        self.refresh_timeout();
        if !self.is_ingress_complete() {
            self.with_handler(|h, t| h.on_headers_complete(t, msg));
        }
    }

    fn process_ingress_body(&mut self, data: Bytes) {
        if self.flags.aborted {
            return;
        }
        self.refresh_timeout();
        let len = data.len();
        self.ctx
            .transport
            .notify_ingress_body_processed(u32::try_from(len).unwrap_or(u32::MAX));
        let offset = self.ingress_body_offset;
        self.ingress_body_offset += len as u64;

        if !self.is_ingress_complete() {
            self.with_handler(|h, t| {
                if t.flags.partially_reliable {
                    h.on_body_with_offset(t, offset, data);
                } else {
                    h.on_body(t, data);
                }
            });
        }

        if self.flags.use_flow_control && !self.is_ingress_eom_seen() && !self.flags.aborted {
            self.recv_to_ack.record(u32::try_from(len).unwrap_or(u32::MAX));
            let divisor = if self.ctx.transport.is_draining() {
                // Only reopen a closed window while draining.
                1
            } else {
                self.ctx.config.window_update_divisor
            };
            if self
                .recv_to_ack
                .should_flush(self.recv_window.capacity(), divisor)
            {
                self.flush_window_update();
            }
        }
    }

    fn process_ingress_chunk_header(&mut self, length: usize) {
        if self.flags.aborted {
            return;
        }
        self.refresh_timeout();
        if !self.is_ingress_complete() {
            self.with_handler(|h, t| h.on_chunk_header(t, length));
        }
    }

    fn process_ingress_chunk_complete(&mut self) {
        if self.flags.aborted {
            return;
        }
        self.refresh_timeout();
        if !self.is_ingress_complete() {
            self.with_handler(|h, t| h.on_chunk_complete(t));
        }
    }

    fn process_ingress_trailers(&mut self, trailers: HeaderMap) {
        if self.flags.aborted {
            return;
        }
        self.refresh_timeout();
        if !self.is_ingress_complete() {
            self.with_handler(|h, t| h.on_trailers(t, trailers));
        }
    }

    fn process_ingress_upgrade(&mut self, protocol: UpgradeProtocol) {
        if self.flags.aborted {
            return;
        }
        if !self.is_ingress_complete() {
            self.with_handler(|h, t| h.on_upgrade(t, protocol));
        }
    }

    fn process_ingress_eom(&mut self) {
        if self.flags.aborted {
            return;
        }
        if !self.ingress_state.transit(IngressEvent::EomFlushed) {
            return;
        }
        debug!(txn = %self, "ingress EOM");
        self.update_read_timeout();
        self.with_handler(|h, t| h.on_eom(t));
    }

    /// Send accumulated receive credit to the peer. Held back after the
    /// ingress EOM, and on upstream transactions until anything was sent or
    /// received.
    pub(super) fn flush_window_update(&mut self) {
        if self.recv_to_ack.pending() == 0
            || !self.flags.use_flow_control
            || self.is_ingress_eom_seen()
        {
            return;
        }
        if self.direction == TransportDirection::Upstream
            && self.egress_state == crate::state::EgressState::Start
            && self.ingress_state == IngressState::Start
        {
            return;
        }
        let amount = self.recv_to_ack.take();
        trace!(
            txn = %self,
            amount,
            size = self.recv_window.size(),
            capacity = self.recv_window.capacity(),
            "sending window update"
        );
        self.ctx.transport.send_window_update(self.id, amount);
    }

    /// Returns false (after reporting the error) if `len` more body bytes
    /// exceed the declared Content-Length.
    fn update_content_length_remaining(&mut self, len: u64) -> bool {
        let Some(remaining) = self.expected_ingress_content_length else {
            return true;
        };
        if len > remaining {
            let message = format!(
                "invalid body length: got {} bytes with {} remaining",
                len, remaining
            );
            self.expected_ingress_content_length = Some(0);
            self.handle_error(HttpError::ingress(ErrorKind::ParseBody, message));
            return false;
        }
        self.expected_ingress_content_length = Some(remaining - len);
        true
    }

    fn advance_ingress_offset(&mut self, offset: u64) {
        if offset <= self.ingress_body_offset {
            return;
        }
        let skipped = offset - self.ingress_body_offset;
        if let Some(remaining) = self.expected_ingress_content_length.as_mut() {
            *remaining = remaining.saturating_sub(skipped);
        }
        self.ingress_body_offset = offset;
    }

    /// Ingress idle timer expired.
    pub(super) fn on_idle_timeout(&mut self) {
        match self.ctx.transport.transaction_timeout(self.id) {
            TimeoutAction::Handled => {
                debug!(txn = %self, "idle timeout handled by transport");
            }
            TimeoutAction::AbortTransaction => self.on_ingress_timeout(),
        }
    }

    fn on_ingress_timeout(&mut self) {
        debug!(txn = %self, "ingress timeout");
        self.pause_ingress_inner();
        let error = if self.is_expecting_window_update() {
            HttpError::both(ErrorKind::WriteTimeout, "timed out waiting for a window update")
                .with_codec_code(ErrorCode::FlowControlError)
        } else {
            HttpError::both(ErrorKind::Timeout, "ingress timed out")
        };
        self.handle_error(error);
    }

    fn pause_ingress_inner(&mut self) {
        if !self.flags.ingress_paused {
            self.flags.ingress_paused = true;
            self.ctx.transport.pause_ingress(self.id);
        }
        self.idle_deadline = None;
    }

    // ========================================================================
    // Error delivery
    // ========================================================================

    pub(super) fn handle_error(&mut self, mut error: HttpError) {
        let was_ingress_complete = self.is_ingress_complete();
        let was_egress_complete = self.is_egress_complete();
        let mut notify = self.handler.is_some();

        if error.direction() == Direction::Ingress
            && self.is_ingress_eom_seen()
            && self.is_expecting_window_update()
        {
            error.set_direction(Direction::IngressAndEgress);
            self.send_abort_code(ErrorCode::FlowControlError);
        }

        if error.kind() == ErrorKind::StreamAbort {
            self.flags.aborted = true;
        } else if let Some(code) = error.codec_code() {
            self.send_abort_code(code);
        }

        match error.direction() {
            Direction::IngressAndEgress => {
                self.mark_egress_complete();
                self.mark_ingress_complete();
                if was_egress_complete && was_ingress_complete {
                    notify = false;
                }
            }
            Direction::Egress => {
                self.mark_egress_complete();
                if !was_egress_complete
                    && self.is_ingress_eom_queued()
                    && self.flags.ingress_error_seen
                {
                    // An ingress error was held back behind the queued EOM.
                    self.mark_ingress_complete();
                }
                if was_egress_complete && !self.should_notify_ex_txn_error(Direction::Egress) {
                    notify = false;
                }
            }
            Direction::Ingress => {
                if self.is_ingress_eom_queued() {
                    self.flags.ingress_error_seen = true;
                    return;
                }
                self.mark_ingress_complete();
                if was_ingress_complete && !self.should_notify_ex_txn_error(Direction::Ingress) {
                    notify = false;
                }
            }
        }

        if notify {
            debug!(txn = %self, %error, "delivering error to handler");
            self.with_handler(|h, t| h.on_error(t, &error));
        } else {
            trace!(txn = %self, %error, "error not delivered");
        }
    }

    pub(super) fn mark_ingress_complete(&mut self) {
        self.deferred_ingress.clear();
        self.ingress_state = IngressState::ReceivingDone;
        self.idle_deadline = None;
    }
}
