//! Shared fixtures for integration tests: a recording transport, a
//! scriptable handler and a manual clock.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use quicd_txn::{
    CodecInfo, Direction, EgressWrite, ErrorCode, ErrorKind, Handler, HeaderSize, HeadersWrite,
    HttpError, HttpMessage, Instant, ManualClock, PriorityUpdate, StreamId, TimeoutAction,
    Transaction, TransactionConfig, TransactionContext, TransactionTable, Transport,
    TransportDirection, TransportInfo, UpgradeProtocol,
};

// ============================================================================
// Transport
// ============================================================================

/// A call the transaction made on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    PauseIngress,
    ResumeIngress,
    Headers { status: u16, eom: bool },
    Body { len: usize, eom: bool },
    ChunkHeader(usize),
    ChunkTerminator,
    Eom { trailers: bool },
    Abort(ErrorCode),
    Priority(u8),
    WindowUpdate(u32),
    SkipBodyTo(u64),
    RejectBodyTo(u64),
    Detach,
}

pub struct MockTransport {
    calls: RefCell<Vec<(StreamId, Call)>>,
    pub codec: Cell<CodecInfo>,
    pub draining: Cell<bool>,
    pub timeout_action: Cell<TimeoutAction>,
    pub next_stream: Cell<Option<u64>>,
    pub pending_egress_notifications: Cell<usize>,
    pub buffered: Cell<i64>,
    /// Byte events registered for every write that carries the EOM.
    pub eom_byte_events: Cell<u32>,
}

impl MockTransport {
    pub fn new(codec: CodecInfo) -> Rc<Self> {
        Rc::new(Self {
            calls: RefCell::new(Vec::new()),
            codec: Cell::new(codec),
            draining: Cell::new(false),
            timeout_action: Cell::new(TimeoutAction::AbortTransaction),
            next_stream: Cell::new(None),
            pending_egress_notifications: Cell::new(0),
            buffered: Cell::new(0),
            eom_byte_events: Cell::new(0),
        })
    }

    fn record(&self, id: StreamId, call: Call) {
        self.calls.borrow_mut().push((id, call));
    }

    pub fn calls(&self, id: u64) -> Vec<Call> {
        self.calls
            .borrow()
            .iter()
            .filter(|(stream, _)| stream.0 == id)
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Total body bytes written on stream `id`.
    pub fn body_bytes(&self, id: u64) -> usize {
        self.calls(id)
            .iter()
            .map(|call| match call {
                Call::Body { len, .. } => *len,
                _ => 0,
            })
            .sum()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    fn eom_events(&self, eom: bool) -> u32 {
        if eom {
            self.eom_byte_events.get()
        } else {
            0
        }
    }
}

impl Transport for MockTransport {
    fn pause_ingress(&self, id: StreamId) {
        self.record(id, Call::PauseIngress);
    }

    fn resume_ingress(&self, id: StreamId) {
        self.record(id, Call::ResumeIngress);
    }

    fn transaction_timeout(&self, _id: StreamId) -> TimeoutAction {
        self.timeout_action.get()
    }

    fn send_headers(&self, id: StreamId, msg: &HttpMessage, eom: bool) -> HeadersWrite {
        self.record(
            id,
            Call::Headers {
                status: msg.status_code(),
                eom,
            },
        );
        HeadersWrite {
            size: HeaderSize {
                compressed: 10,
                uncompressed: 30,
            },
            byte_events: self.eom_events(eom),
        }
    }

    fn send_body(
        &self,
        id: StreamId,
        body: Bytes,
        eom: bool,
        _track_last_byte: bool,
    ) -> EgressWrite {
        self.record(id, Call::Body {
            len: body.len(),
            eom,
        });
        EgressWrite::tracked(body.len(), self.eom_events(eom))
    }

    fn send_chunk_header(&self, id: StreamId, length: usize) -> usize {
        self.record(id, Call::ChunkHeader(length));
        4
    }

    fn send_chunk_terminator(&self, id: StreamId) -> usize {
        self.record(id, Call::ChunkTerminator);
        2
    }

    fn send_eom(&self, id: StreamId, trailers: Option<&HeaderMap>) -> EgressWrite {
        self.record(id, Call::Eom {
            trailers: trailers.is_some(),
        });
        EgressWrite::tracked(0, self.eom_events(true))
    }

    fn send_abort(&self, id: StreamId, code: ErrorCode) -> usize {
        self.record(id, Call::Abort(code));
        4
    }

    fn send_priority(&self, id: StreamId, pri: &PriorityUpdate) -> usize {
        self.record(id, Call::Priority(pri.weight));
        5
    }

    fn send_window_update(&self, id: StreamId, bytes: u32) -> usize {
        self.record(id, Call::WindowUpdate(bytes));
        4
    }

    fn notify_pending_egress(&self) {
        self.pending_egress_notifications
            .set(self.pending_egress_notifications.get() + 1);
    }

    fn notify_egress_body_buffered(&self, bytes: i64) {
        self.buffered.set(self.buffered.get() + bytes);
    }

    fn detach(&self, id: StreamId) {
        self.record(id, Call::Detach);
    }

    fn local_address(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 443))
    }

    fn peer_address(&self) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 7], 50123))
    }

    fn setup_transport_info(&self) -> TransportInfo {
        TransportInfo {
            application_protocol: Some("h2".into()),
            ..TransportInfo::default()
        }
    }

    fn current_transport_info(&self) -> Option<TransportInfo> {
        Some(self.setup_transport_info())
    }

    fn codec(&self) -> CodecInfo {
        self.codec.get()
    }

    fn is_draining(&self) -> bool {
        self.draining.get()
    }

    fn new_pushed_stream(&self, _parent: StreamId) -> Option<StreamId> {
        self.next_stream.take().map(StreamId)
    }

    fn new_ex_stream(&self, _control: StreamId, _unidirectional: bool) -> Option<StreamId> {
        self.next_stream.take().map(StreamId)
    }

    fn skip_body_to(&self, id: StreamId, offset: u64) -> Result<Option<u64>, ErrorCode> {
        self.record(id, Call::SkipBodyTo(offset));
        Ok(Some(offset))
    }

    fn reject_body_to(&self, id: StreamId, offset: u64) -> Result<Option<u64>, ErrorCode> {
        self.record(id, Call::RejectBodyTo(offset));
        Ok(Some(offset))
    }

    fn track_egress_body_delivery(&self, _id: StreamId, _offset: u64) -> Result<(), ErrorCode> {
        Ok(())
    }
}

// ============================================================================
// Handler
// ============================================================================

/// A callback the handler received.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Bound,
    Headers(u16),
    Body(Bytes),
    ChunkHeader(usize),
    ChunkComplete,
    Trailers,
    Eom,
    Upgrade(UpgradeProtocol),
    Error {
        kind: ErrorKind,
        direction: Direction,
        code: Option<ErrorCode>,
    },
    Paused,
    Resumed,
    Pushed(StreamId),
    Ex(StreamId),
    Goaway(ErrorCode),
    Skipped(u64),
    Rejected(u64),
    Detached,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;
pub type Script = Box<dyn FnMut(&mut Transaction, &Event)>;

/// Records every callback into a shared log, then runs an optional script.
pub struct RecordingHandler {
    log: EventLog,
    script: Option<Script>,
    accept_children: bool,
}

impl RecordingHandler {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            script: None,
            accept_children: false,
        }
    }

    pub fn scripted(log: &EventLog, script: impl FnMut(&mut Transaction, &Event) + 'static) -> Self {
        Self {
            log: log.clone(),
            script: Some(Box::new(script)),
            accept_children: false,
        }
    }

    /// Install a handler on pushed and extended transactions offered to it.
    pub fn accepting_children(mut self) -> Self {
        self.accept_children = true;
        self
    }

    pub fn boxed(self) -> Box<dyn Handler> {
        Box::new(self)
    }

    fn record(&mut self, txn: &mut Transaction, event: Event) {
        self.log.borrow_mut().push(event.clone());
        if let Some(script) = self.script.as_mut() {
            script(txn, &event);
        }
    }
}

impl Handler for RecordingHandler {
    fn set_transaction(&mut self, txn: &mut Transaction) {
        self.record(txn, Event::Bound);
    }

    fn detach_transaction(&mut self, _txn: &Transaction) {
        self.log.borrow_mut().push(Event::Detached);
    }

    fn on_headers_complete(&mut self, txn: &mut Transaction, msg: HttpMessage) {
        self.record(txn, Event::Headers(msg.status_code()));
    }

    fn on_body(&mut self, txn: &mut Transaction, body: Bytes) {
        self.record(txn, Event::Body(body));
    }

    fn on_chunk_header(&mut self, txn: &mut Transaction, length: usize) {
        self.record(txn, Event::ChunkHeader(length));
    }

    fn on_chunk_complete(&mut self, txn: &mut Transaction) {
        self.record(txn, Event::ChunkComplete);
    }

    fn on_trailers(&mut self, txn: &mut Transaction, _trailers: HeaderMap) {
        self.record(txn, Event::Trailers);
    }

    fn on_eom(&mut self, txn: &mut Transaction) {
        self.record(txn, Event::Eom);
    }

    fn on_upgrade(&mut self, txn: &mut Transaction, protocol: UpgradeProtocol) {
        self.record(txn, Event::Upgrade(protocol));
    }

    fn on_error(&mut self, txn: &mut Transaction, error: &HttpError) {
        self.record(
            txn,
            Event::Error {
                kind: error.kind(),
                direction: error.direction(),
                code: error.codec_code(),
            },
        );
    }

    fn on_egress_paused(&mut self, txn: &mut Transaction) {
        self.record(txn, Event::Paused);
    }

    fn on_egress_resumed(&mut self, txn: &mut Transaction) {
        self.record(txn, Event::Resumed);
    }

    fn on_pushed_transaction(&mut self, txn: &mut Transaction, pushed: &mut Transaction) {
        if self.accept_children {
            pushed.set_handler(RecordingHandler::new(&self.log).boxed());
        }
        self.record(txn, Event::Pushed(pushed.id()));
    }

    fn on_ex_transaction(&mut self, txn: &mut Transaction, ex: &mut Transaction) {
        if self.accept_children {
            ex.set_handler(RecordingHandler::new(&self.log).boxed());
        }
        self.record(txn, Event::Ex(ex.id()));
    }

    fn on_goaway(&mut self, txn: &mut Transaction, code: ErrorCode) {
        self.record(txn, Event::Goaway(code));
    }

    fn on_body_skipped(&mut self, txn: &mut Transaction, offset: u64) {
        self.record(txn, Event::Skipped(offset));
    }

    fn on_body_rejected(&mut self, txn: &mut Transaction, offset: u64) {
        self.record(txn, Event::Rejected(offset));
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub transport: Rc<MockTransport>,
    pub clock: Rc<ManualClock>,
    pub ctx: TransactionContext,
    pub log: EventLog,
}

impl Harness {
    pub fn new(codec: CodecInfo, config: TransactionConfig) -> Self {
        quicd_txn::telemetry::init_test_logging();
        let transport = MockTransport::new(codec);
        let clock = Rc::new(ManualClock::new(Instant::ZERO));
        let ctx = TransactionContext::new(transport.clone(), clock.clone(), config);
        Self {
            transport,
            clock,
            ctx,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn http2() -> Self {
        Self::new(CodecInfo::http2(), TransactionConfig::default())
    }

    pub fn transaction(&self, id: u64, direction: TransportDirection, handler: RecordingHandler) -> Transaction {
        let mut txn = Transaction::new(&self.ctx, StreamId(id), direction, PriorityUpdate::default());
        txn.set_handler(handler.boxed());
        txn
    }

    /// Downstream transaction with a plain recording handler.
    pub fn downstream(&self, id: u64) -> Transaction {
        self.transaction(id, TransportDirection::Downstream, RecordingHandler::new(&self.log))
    }

    pub fn table(&self, direction: TransportDirection) -> TransactionTable {
        TransactionTable::new(self.ctx.clone(), direction)
    }

    /// Events logged so far, without the initial `Bound`.
    pub fn events(&self) -> Vec<Event> {
        self.log
            .borrow()
            .iter()
            .filter(|event| **event != Event::Bound)
            .cloned()
            .collect()
    }
}

pub fn get(path: &'static str) -> HttpMessage {
    HttpMessage::request(Method::GET, Uri::from_static(path))
}

pub fn post(path: &'static str, content_length: usize) -> HttpMessage {
    HttpMessage::request(Method::POST, Uri::from_static(path))
        .with_header("content-length", &content_length.to_string())
}

pub fn response(status: u16) -> HttpMessage {
    let status = StatusCode::from_u16(status).expect("valid status");
    HttpMessage::response(status)
}

pub fn error_event(kind: ErrorKind, direction: Direction, code: Option<ErrorCode>) -> Event {
    Event::Error {
        kind,
        direction,
        code,
    }
}
