//! # Transaction
//!
//! One request/response (or push, or extended) exchange on one stream.
//!
//! A transaction sits between the connection's [`Transport`] and the
//! application's [`Handler`]:
//!
//! - the transport feeds it ingress events (`on_ingress_*`), which are
//!   validated against the ingress state machine and either delivered to
//!   the handler or queued while ingress is paused;
//! - the handler calls egress methods (`send_*`), which are validated
//!   against the egress state machine and either written through to the
//!   transport or buffered while flow control, rate limiting or transport
//!   backpressure hold them back.
//!
//! ## Lifecycle
//!
//! Transactions are owned by their session (see [`crate::session`]). Every
//! public entry point runs under a depth counter; when the outermost call
//! returns and both directions are complete, no byte events are pending and
//! nothing is queued for egress, the transaction finalizes itself: the
//! handler gets `detach_transaction`, the transport gets `detach`, and the
//! owner drops it on its next reap.

mod egress;
mod events;
mod ingress;


use std::cell::Cell;
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use http::HeaderMap;
use tracing::{debug, trace};

use crate::byte_events::{ByteEventObserver, ByteEventTracker, TransactionInfo};
use crate::config::TransactionConfig;
use crate::deferred::{DeferredEgress, DeferredIngress};
use crate::error::{Direction, ErrorCode};
use crate::flow_control::{Window, WindowUpdateTracker};
use crate::handler::Handler;
use crate::priority::{PriorityHandle, PriorityTree, PriorityUpdate, SharedPriorityTree};
use crate::rate_limit::RateLimiter;
use crate::state::{EgressState, IngressState};
use crate::time::{Clock, Instant};
use crate::transport::{ReplaySafetyCallback, Transport};
use crate::types::{CodecInfo, StreamId, TransportDirection, TransportInfo};

// ============================================================================
// Context shared by every transaction of a session
// ============================================================================

/// Connection-wide collaborators handed to each new transaction.
#[derive(Clone)]
pub struct TransactionContext {
    pub transport: Rc<dyn Transport>,
    pub clock: Rc<dyn Clock>,
    pub priority_tree: SharedPriorityTree,
    pub config: Rc<TransactionConfig>,
    next_seq_no: Rc<Cell<u32>>,
}

impl TransactionContext {
    pub fn new(
        transport: Rc<dyn Transport>,
        clock: Rc<dyn Clock>,
        config: TransactionConfig,
    ) -> Self {
        Self {
            transport,
            clock,
            priority_tree: PriorityTree::shared(),
            config: Rc::new(config),
            next_seq_no: Rc::new(Cell::new(0)),
        }
    }

    /// Index of the next transaction on this connection.
    fn allocate_seq_no(&self) -> u32 {
        let seq = self.next_seq_no.get();
        self.next_seq_no.set(seq.wrapping_add(1));
        seq
    }
}

/// Attributes of an extended transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExAttributes {
    pub control_stream: StreamId,
    pub unidirectional: bool,
}

/// Advisory scheduling statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrioritySummary {
    pub insert_depth: u64,
    pub current_depth: u64,
    pub cumulative_ratio: f64,
    pub egress_calls: u64,
}

impl PrioritySummary {
    /// Mean share of egress received per write opportunity.
    pub fn average_ratio(&self) -> f64 {
        if self.egress_calls == 0 {
            0.0
        } else {
            self.cumulative_ratio / self.egress_calls as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    use_flow_control: bool,
    ingress_paused: bool,
    /// Transport backpressure.
    egress_paused: bool,
    flow_control_paused: bool,
    /// Last pause state reported to the handler.
    handler_egress_paused: bool,
    aborted: bool,
    ingress_error_seen: bool,
    head_request: bool,
    partially_reliable: bool,
    egress_headers_delivered: bool,
    track_last_byte_delivery: bool,
    enqueued: bool,
    priority_fallback: bool,
    /// A deferred-ingress drain loop is running.
    in_resume: bool,
    /// Ingress was resumed inside a handler callback; drain afterwards.
    drain_pending: bool,
    /// Pause state changed inside a handler callback; report afterwards.
    pause_state_dirty: bool,
    detached: bool,
}

// ============================================================================
// Transaction
// ============================================================================

pub struct Transaction {
    id: StreamId,
    direction: TransportDirection,
    seq_no: u32,
    ctx: TransactionContext,

    handler: Option<Box<dyn Handler>>,
    /// Set while the handler is checked out for a callback.
    in_callback: bool,
    /// Handler installed (or cleared) from inside a callback.
    replacement_handler: Option<Option<Box<dyn Handler>>>,

    ingress_state: IngressState,
    egress_state: EgressState,
    flags: Flags,

    recv_window: Window,
    send_window: Window,
    recv_to_ack: WindowUpdateTracker,

    priority: PriorityUpdate,
    priority_handle: Option<PriorityHandle>,
    priority_summary: PrioritySummary,

    deferred_ingress: DeferredIngress,
    deferred_egress: DeferredEgress,
    pending_trailers: Option<HeaderMap>,
    rate_limiter: RateLimiter,
    byte_events: ByteEventTracker,

    pushed_transactions: BTreeSet<StreamId>,
    ex_transactions: BTreeSet<StreamId>,
    assoc_stream_id: Option<StreamId>,
    ex_attributes: Option<ExAttributes>,
    /// Push/extended transactions created here, awaiting adoption.
    spawned: Vec<Transaction>,

    last_response_status: u16,
    expected_ingress_content_length: Option<u64>,
    expected_egress_content_length: Option<u64>,
    /// Body bytes the handler has submitted (or skipped past).
    egress_body_length: u64,
    /// Body bytes handed to the transport (or trimmed away).
    egress_body_committed: u64,
    ingress_body_offset: u64,

    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,

    depth: u32,
}

impl Transaction {
    /// Create a request/response transaction.
    pub fn new(
        ctx: &TransactionContext,
        id: StreamId,
        direction: TransportDirection,
        priority: PriorityUpdate,
    ) -> Self {
        Self::build(ctx, id, direction, priority, None, None)
    }

    /// Create a pushed transaction associated with `assoc`.
    ///
    /// A push created locally never receives ingress; a push received from
    /// the peer never sends egress.
    pub fn new_pushed(
        ctx: &TransactionContext,
        id: StreamId,
        direction: TransportDirection,
        assoc: StreamId,
        priority: PriorityUpdate,
    ) -> Self {
        Self::build(ctx, id, direction, priority, Some(assoc), None)
    }

    /// Create an extended transaction on a control stream.
    pub fn new_ex(
        ctx: &TransactionContext,
        id: StreamId,
        direction: TransportDirection,
        attributes: ExAttributes,
        priority: PriorityUpdate,
    ) -> Self {
        Self::build(ctx, id, direction, priority, None, Some(attributes))
    }

    fn build(
        ctx: &TransactionContext,
        id: StreamId,
        direction: TransportDirection,
        priority: PriorityUpdate,
        assoc_stream_id: Option<StreamId>,
        ex_attributes: Option<ExAttributes>,
    ) -> Self {
        let config = ctx.config.clone();
        let now = ctx.clock.now();
        let insertion = ctx.priority_tree.borrow_mut().add_transaction(id, priority);

        let mut rate_limiter = RateLimiter::disabled();
        if config.egress_rate_limit_bps > 0 {
            rate_limiter.set_limit(config.egress_rate_limit_bps, now);
        }

        let mut txn = Self {
            id,
            direction,
            seq_no: ctx.allocate_seq_no(),
            ctx: ctx.clone(),
            handler: None,
            in_callback: false,
            replacement_handler: None,
            ingress_state: IngressState::Start,
            egress_state: EgressState::Start,
            flags: Flags {
                use_flow_control: config.use_flow_control,
                priority_fallback: insertion.fallback,
                ..Flags::default()
            },
            recv_window: Window::new(config.receive_initial_window),
            send_window: Window::new(config.send_initial_window),
            recv_to_ack: WindowUpdateTracker::new(),
            priority,
            priority_handle: Some(insertion.handle),
            priority_summary: PrioritySummary {
                insert_depth: insertion.depth,
                current_depth: insertion.depth,
                ..PrioritySummary::default()
            },
            deferred_ingress: DeferredIngress::new(config.max_deferred_ingress),
            deferred_egress: DeferredEgress::new(),
            pending_trailers: None,
            rate_limiter,
            byte_events: ByteEventTracker::new(now),
            pushed_transactions: BTreeSet::new(),
            ex_transactions: BTreeSet::new(),
            assoc_stream_id,
            ex_attributes,
            spawned: Vec::new(),
            last_response_status: 0,
            expected_ingress_content_length: None,
            expected_egress_content_length: None,
            egress_body_length: 0,
            egress_body_committed: 0,
            ingress_body_offset: 0,
            idle_timeout: config.idle_timeout(),
            idle_deadline: None,
            depth: 0,
        };

        if assoc_stream_id.is_some() {
            match direction {
                TransportDirection::Downstream => txn.ingress_state = IngressState::ReceivingDone,
                TransportDirection::Upstream => txn.egress_state = EgressState::SendingDone,
            }
        }
        if let Some(ex) = ex_attributes {
            if ex.unidirectional {
                if txn.is_remote_initiated() {
                    txn.egress_state = EgressState::SendingDone;
                } else {
                    txn.ingress_state = IngressState::ReceivingDone;
                }
            }
        }

        txn.update_read_timeout();
        debug!(
            stream_id = %id,
            seq_no = txn.seq_no,
            direction = %direction,
            pushed = assoc_stream_id.is_some(),
            ex = ex_attributes.is_some(),
            "transaction created"
        );
        txn
    }

    // ========================================================================
    // Reentrancy guard and finalization
    // ========================================================================

    /// Run `f` as a public entry point. Finalization is only considered
    /// when the outermost entry point returns.
    pub(crate) fn guarded<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        if self.depth == 0 {
            self.maybe_finalize();
        }
        out
    }

    fn can_finalize(&self) -> bool {
        !self.flags.detached
            && self.ingress_state.is_terminal()
            && self.egress_state.is_terminal()
            && self.byte_events.pending() == 0
            && !self.flags.enqueued
    }

    fn maybe_finalize(&mut self) {
        if self.in_callback || !self.can_finalize() {
            return;
        }
        self.flags.detached = true;
        self.idle_deadline = None;
        self.rate_limiter.cancel();
        if let Some(handle) = self.priority_handle.take() {
            self.ctx.priority_tree.borrow_mut().remove_transaction(handle);
        }
        debug!(txn = %self, "transaction detached");
        if let Some(mut handler) = self.handler.take() {
            handler.detach_transaction(self);
        }
        self.ctx.transport.detach(self.id);
    }

    /// Finalized; the owner may drop it.
    pub fn is_detached(&self) -> bool {
        self.flags.detached
    }

    // ========================================================================
    // Handler management
    // ========================================================================

    pub fn set_handler(&mut self, handler: Box<dyn Handler>) {
        if self.in_callback {
            self.replacement_handler = Some(Some(handler));
            return;
        }
        self.handler = Some(handler);
        self.with_handler(|h, txn| h.set_transaction(txn));
    }

    /// Drop the handler without notifying it.
    pub fn clear_handler(&mut self) {
        if self.in_callback {
            self.replacement_handler = Some(None);
        } else {
            self.handler = None;
        }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some() || matches!(self.replacement_handler, Some(Some(_)))
    }

    /// Lend the handler to `f` together with this transaction.
    ///
    /// Returns false if there is no handler, or it is already lent out.
    fn with_handler(&mut self, f: impl FnOnce(&mut dyn Handler, &mut Transaction)) -> bool {
        let Some(mut handler) = self.handler.take() else {
            if self.in_callback {
                trace!(stream_id = %self.id, "nested handler notification dropped");
            }
            return false;
        };
        self.in_callback = true;
        f(handler.as_mut(), self);
        self.in_callback = false;

        // A replacement may itself install another one from set_transaction.
        let mut current = Some(handler);
        while let Some(next) = self.replacement_handler.take() {
            current = next;
            if let Some(next) = current.as_mut() {
                self.in_callback = true;
                next.set_transaction(self);
                self.in_callback = false;
            }
        }
        self.handler = current;
        self.after_callback();
        true
    }

    /// Work postponed while the handler was lent out.
    fn after_callback(&mut self) {
        if self.flags.pause_state_dirty {
            self.update_handler_pause_state();
        }
        if self.flags.drain_pending {
            self.flags.drain_pending = false;
            self.drain_deferred_ingress();
        }
    }

    // ========================================================================
    // Identity and state
    // ========================================================================

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn direction(&self) -> TransportDirection {
        self.direction
    }

    pub fn is_upstream(&self) -> bool {
        self.direction == TransportDirection::Upstream
    }

    pub fn is_downstream(&self) -> bool {
        self.direction == TransportDirection::Downstream
    }

    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn ingress_state(&self) -> IngressState {
        self.ingress_state
    }

    pub fn egress_state(&self) -> EgressState {
        self.egress_state
    }

    pub fn is_ingress_complete(&self) -> bool {
        self.ingress_state.is_terminal()
    }

    pub fn is_egress_complete(&self) -> bool {
        self.egress_state.is_terminal()
    }

    pub fn is_ingress_eom_seen(&self) -> bool {
        self.ingress_state.is_eom_seen()
    }

    pub fn is_egress_eom_seen(&self) -> bool {
        self.egress_state.is_eom_seen()
    }

    pub fn is_ingress_eom_queued(&self) -> bool {
        self.ingress_state == IngressState::EomQueued
    }

    pub fn is_aborted(&self) -> bool {
        self.flags.aborted
    }

    pub fn is_ingress_paused(&self) -> bool {
        self.flags.ingress_paused
    }

    /// Transport backpressure flag.
    pub fn is_egress_paused(&self) -> bool {
        self.flags.egress_paused
    }

    pub fn is_flow_control_paused(&self) -> bool {
        self.flags.flow_control_paused
    }

    /// Pause state last reported to the handler.
    pub fn is_handler_egress_paused(&self) -> bool {
        self.flags.handler_egress_paused
    }

    pub fn is_enqueued(&self) -> bool {
        self.flags.enqueued
    }

    pub fn is_partially_reliable(&self) -> bool {
        self.flags.partially_reliable
    }

    pub fn is_egress_headers_delivered(&self) -> bool {
        self.flags.egress_headers_delivered
    }

    pub fn uses_flow_control(&self) -> bool {
        self.flags.use_flow_control
    }

    pub fn last_response_status(&self) -> u16 {
        self.last_response_status
    }

    /// An interim (1xx, not 101) response was the last one seen.
    pub fn extra_response_expected(&self) -> bool {
        (100..200).contains(&self.last_response_status) && self.last_response_status != 101
    }

    /// Whether the peer opened this stream.
    pub fn is_remote_initiated(&self) -> bool {
        let client = self.ctx.transport.codec().protocol.is_client_initiated(self.id);
        match self.direction {
            TransportDirection::Downstream => client,
            TransportDirection::Upstream => !client,
        }
    }

    // ========================================================================
    // Push and extended transactions
    // ========================================================================

    pub fn is_pushed(&self) -> bool {
        self.assoc_stream_id.is_some()
    }

    pub fn assoc_stream_id(&self) -> Option<StreamId> {
        self.assoc_stream_id
    }

    pub fn is_ex_transaction(&self) -> bool {
        self.ex_attributes.is_some()
    }

    pub fn ex_attributes(&self) -> Option<ExAttributes> {
        self.ex_attributes
    }

    pub fn control_stream(&self) -> Option<StreamId> {
        self.ex_attributes.map(|ex| ex.control_stream)
    }

    pub fn is_unidirectional(&self) -> bool {
        self.ex_attributes.map(|ex| ex.unidirectional).unwrap_or(false)
    }

    pub fn pushed_transactions(&self) -> &BTreeSet<StreamId> {
        &self.pushed_transactions
    }

    pub fn ex_transactions(&self) -> &BTreeSet<StreamId> {
        &self.ex_transactions
    }

    pub fn remove_pushed_transaction(&mut self, id: StreamId) {
        self.guarded(|txn| {
            txn.pushed_transactions.remove(&id);
        })
    }

    pub fn remove_ex_transaction(&mut self, id: StreamId) {
        self.guarded(|txn| {
            txn.ex_transactions.remove(&id);
        })
    }

    /// Start a server push associated with this transaction.
    ///
    /// Returns `None` once egress EOM was sent, or if the transport cannot
    /// open a push stream. The new transaction stays here until the owner
    /// collects it with [`Transaction::take_spawned`].
    pub fn new_pushed_transaction(
        &mut self,
        handler: Box<dyn Handler>,
    ) -> Option<&mut Transaction> {
        if self.is_egress_eom_seen() {
            debug!(txn = %self, "cannot push after egress EOM");
            return None;
        }
        let id = self.ctx.transport.new_pushed_stream(self.id)?;
        let priority = PriorityUpdate::new(Some(self.id), false, self.priority.weight);
        let mut pushed =
            Transaction::new_pushed(&self.ctx, id, self.direction, self.id, priority);
        pushed.set_handler(handler);
        self.pushed_transactions.insert(id);
        debug!(txn = %self, pushed = %id, "push started");
        self.spawned.push(pushed);
        self.spawned.last_mut()
    }

    /// Open an extended transaction using this one as control stream.
    pub fn new_ex_transaction(
        &mut self,
        handler: Box<dyn Handler>,
        unidirectional: bool,
    ) -> Option<&mut Transaction> {
        let id = self.ctx.transport.new_ex_stream(self.id, unidirectional)?;
        let attributes = ExAttributes {
            control_stream: self.id,
            unidirectional,
        };
        let mut ex = Transaction::new_ex(
            &self.ctx,
            id,
            self.direction,
            attributes,
            PriorityUpdate::default(),
        );
        ex.set_handler(handler);
        self.ex_transactions.insert(id);
        debug!(txn = %self, ex = %id, unidirectional, "extended transaction opened");
        self.spawned.push(ex);
        self.spawned.last_mut()
    }

    /// The peer pushed `pushed` on this transaction. The handler accepts it
    /// by installing a handler on it; otherwise it is refused. Returns
    /// whether it was accepted.
    pub fn on_pushed_transaction(&mut self, pushed: &mut Transaction) -> bool {
        self.guarded(|txn| {
            debug_assert_eq!(pushed.assoc_stream_id, Some(txn.id));
            let offered = txn.with_handler(|h, t| h.on_pushed_transaction(t, pushed));
            if !offered || !pushed.has_handler() {
                debug!(txn = %txn, pushed = %pushed.id, "push refused");
                pushed.send_abort_with_code(ErrorCode::RefusedStream);
                return false;
            }
            txn.pushed_transactions.insert(pushed.id);
            true
        })
    }

    /// The peer opened extended transaction `ex` on this control stream.
    pub fn on_ex_transaction(&mut self, ex: &mut Transaction) -> bool {
        self.guarded(|txn| {
            debug_assert_eq!(ex.control_stream(), Some(txn.id));
            let offered = txn.with_handler(|h, t| h.on_ex_transaction(t, ex));
            if !offered || !ex.has_handler() {
                debug!(txn = %txn, ex = %ex.id, "extended transaction refused");
                ex.send_abort_with_code(ErrorCode::RefusedStream);
                return false;
            }
            txn.ex_transactions.insert(ex.id);
            true
        })
    }

    /// Hand over push/extended transactions created by this one.
    pub fn take_spawned(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.spawned)
    }

    /// Only unidirectional extended transactions report errors on a
    /// direction that is already complete.
    fn should_notify_ex_txn_error(&self, direction: Direction) -> bool {
        if !self.is_unidirectional() {
            return false;
        }
        if self.is_remote_initiated() {
            direction == Direction::Ingress
        } else {
            direction == Direction::Egress
        }
    }

    // ========================================================================
    // Flow-control introspection
    // ========================================================================

    pub fn send_window(&self) -> &Window {
        &self.send_window
    }

    pub fn recv_window(&self) -> &Window {
        &self.recv_window
    }

    /// Receive credit released but not yet granted to the peer.
    pub fn recv_to_ack(&self) -> u32 {
        self.recv_to_ack.pending()
    }

    pub fn deferred_egress_len(&self) -> usize {
        self.deferred_egress.len()
    }

    pub fn deferred_ingress_len(&self) -> usize {
        self.deferred_ingress.len()
    }

    /// Most ingress events ever queued at once.
    pub fn max_deferred_ingress_size(&self) -> usize {
        self.deferred_ingress.high_water_mark()
    }

    pub fn egress_body_length(&self) -> u64 {
        self.egress_body_length
    }

    pub fn ingress_body_offset(&self) -> u64 {
        self.ingress_body_offset
    }

    // ========================================================================
    // Priority
    // ========================================================================

    pub fn priority(&self) -> PriorityUpdate {
        self.priority
    }

    pub fn priority_summary(&self) -> PrioritySummary {
        self.priority_summary
    }

    /// The requested parent was unknown when this stream was inserted.
    pub fn priority_fallback(&self) -> bool {
        self.flags.priority_fallback
    }

    /// Re-prioritize locally and tell the peer.
    pub fn update_and_send_priority(&mut self, priority: PriorityUpdate) {
        self.guarded(|txn| {
            txn.apply_priority(priority);
            txn.ctx.transport.send_priority(txn.id, &priority);
        })
    }

    /// Re-prioritize locally only; the peer already knows.
    pub fn on_priority_update(&mut self, priority: PriorityUpdate) {
        self.guarded(|txn| txn.apply_priority(priority))
    }

    fn apply_priority(&mut self, priority: PriorityUpdate) {
        self.priority = priority;
        if let Some(handle) = self.priority_handle {
            let depth = self
                .ctx
                .priority_tree
                .borrow_mut()
                .update_priority(handle, priority);
            self.priority_summary.current_depth = depth;
        }
        trace!(stream_id = %self.id, weight = priority.weight, "priority updated");
    }

    fn enqueue(&mut self) {
        if self.flags.enqueued {
            return;
        }
        self.flags.enqueued = true;
        if let Some(handle) = self.priority_handle {
            self.ctx.priority_tree.borrow_mut().signal_pending_egress(handle);
        }
        self.ctx.transport.notify_pending_egress();
    }

    fn dequeue(&mut self) {
        if !self.flags.enqueued {
            return;
        }
        self.flags.enqueued = false;
        if let Some(handle) = self.priority_handle {
            self.ctx.priority_tree.borrow_mut().clear_pending_egress(handle);
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    pub fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.guarded(|txn| {
            txn.idle_timeout = timeout;
            txn.update_read_timeout();
        })
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Earliest instant at which `on_timeout` has work to do.
    pub fn next_timeout(&self) -> Option<Instant> {
        match (self.idle_deadline, self.rate_limiter.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire any timers due at `now`.
    pub fn on_timeout(&mut self, now: Instant) {
        self.guarded(|txn| {
            if txn.rate_limiter.on_timeout(now) {
                trace!(stream_id = %txn.id, "rate limit delay elapsed");
                txn.flush_egress_eagerly();
            }
            if let Some(deadline) = txn.idle_deadline {
                if deadline <= now {
                    txn.idle_deadline = None;
                    txn.on_idle_timeout();
                }
            }
        })
    }

    fn refresh_timeout(&mut self) {
        self.idle_deadline = self
            .idle_timeout
            .map(|timeout| self.ctx.clock.now().saturating_add(timeout));
    }

    fn update_read_timeout(&mut self) {
        if self.is_expecting_ingress() {
            self.refresh_timeout();
        } else {
            self.idle_deadline = None;
        }
    }

    fn is_expecting_ingress(&self) -> bool {
        !self.flags.ingress_paused
            && (!self.is_ingress_eom_seen() || self.is_expecting_window_update())
    }

    fn is_expecting_window_update(&self) -> bool {
        !self.is_egress_complete() && self.flags.use_flow_control && self.send_window.size() == 0
    }

    // ========================================================================
    // Transport delegation
    // ========================================================================

    pub fn local_address(&self) -> SocketAddr {
        self.ctx.transport.local_address()
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.ctx.transport.peer_address()
    }

    pub fn setup_transport_info(&self) -> TransportInfo {
        self.ctx.transport.setup_transport_info()
    }

    pub fn current_transport_info(&self) -> Option<TransportInfo> {
        self.ctx.transport.current_transport_info()
    }

    pub fn codec(&self) -> CodecInfo {
        self.ctx.transport.codec()
    }

    pub fn security_protocol(&self) -> Option<String> {
        self.ctx.transport.security_protocol()
    }

    pub fn is_replay_safe(&self) -> bool {
        self.ctx.transport.is_replay_safe()
    }

    pub fn need_to_block_for_replay_safety(&self) -> bool {
        self.ctx.transport.need_to_block_for_replay_safety()
    }

    pub fn add_waiting_for_replay_safety(&self, callback: Rc<dyn ReplaySafetyCallback>) {
        self.ctx.transport.add_waiting_for_replay_safety(callback);
    }

    pub fn remove_waiting_for_replay_safety(&self, callback: &Rc<dyn ReplaySafetyCallback>) {
        self.ctx.transport.remove_waiting_for_replay_safety(callback);
    }

    // ========================================================================
    // Byte events
    // ========================================================================

    pub fn set_byte_event_observer(&mut self, observer: Option<Box<dyn ByteEventObserver>>) {
        self.byte_events.set_observer(observer);
    }

    pub fn pending_byte_events(&self) -> u32 {
        self.byte_events.pending()
    }

    pub fn transaction_info(&self) -> TransactionInfo {
        self.byte_events.info()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[id={}, seq={}, direction={}, ingress={}, egress={}]",
            self.id, self.seq_no, self.direction, self.ingress_state, self.egress_state
        )
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("seq_no", &self.seq_no)
            .field("ingress_state", &self.ingress_state)
            .field("egress_state", &self.egress_state)
            .field("flags", &self.flags)
            .field("send_window", &self.send_window)
            .field("recv_window", &self.recv_window)
            .field("deferred_egress", &self.deferred_egress.len())
            .field("deferred_ingress", &self.deferred_ingress.len())
            .field("pending_byte_events", &self.byte_events.pending())
            .finish()
    }
}

/// Abort code used when the handler aborts without naming one.
fn default_abort_code(txn: &Transaction) -> ErrorCode {
    if txn.is_upstream() || txn.is_pushed() {
        ErrorCode::Cancel
    } else {
        ErrorCode::InternalError
    }
}
