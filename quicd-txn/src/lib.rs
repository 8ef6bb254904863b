//! # quicd-txn: per-stream HTTP transactions
//!
//! The layer between an HTTP connection (the [`Transport`], which owns the
//! codec and the socket) and the application (a [`Handler`] per request).
//! Each request/response exchange on one stream is a [`Transaction`]. It:
//!
//! - validates every ingress and egress event against separate state
//!   machines ([`state`]);
//! - enforces per-stream flow control in both directions ([`flow_control`]);
//! - queues ingress while the handler has paused it, and buffers egress
//!   while the window, the rate limiter or the transport hold it back
//!   ([`deferred`], [`rate_limit`]);
//! - reports pause/resume to the handler and errors with a direction;
//! - participates in a connection-wide priority tree ([`priority`]);
//! - tracks byte-level delivery events ([`byte_events`]);
//! - supports pushed and extended transactions and partially reliable
//!   bodies.
//!
//! ## Threading
//!
//! Everything here is single-threaded. A [`TransactionTable`] and its
//! transactions live on one event-loop thread; shared collaborators are
//! `Rc`. Use [`runtime::create_runtime`] and [`runtime::drive_timers`] to
//! run a session's timers on a current-thread tokio runtime.
//!
//! ## Example
//!
//! ```ignore
//! let ctx = TransactionContext::new(transport, Rc::new(SystemClock::new()), config);
//! let mut table = TransactionTable::new(ctx, TransportDirection::Downstream);
//! table.create(StreamId(1), Box::new(MyHandler::default()), PriorityUpdate::default());
//! table.with_transaction(StreamId(1), |txn| txn.on_ingress_headers_complete(request));
//! ```

pub mod byte_events;
pub mod config;
pub mod deferred;
pub mod error;
pub mod flow_control;
pub mod handler;
pub mod message;
pub mod priority;
pub mod rate_limit;
pub mod runtime;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod time;
pub mod transaction;
pub mod transport;
pub mod types;

pub use byte_events::{ByteEvent, ByteEventKind, ByteEventObserver, TransactionInfo};
pub use config::{LogLevel, LoggingConfig, TransactionConfig};
pub use error::{Direction, ErrorCode, ErrorKind, HttpError, Result};
pub use flow_control::Window;
pub use handler::Handler;
pub use message::{HeaderSize, HttpMessage, MessageHead};
pub use priority::{PriorityTree, PriorityUpdate, SharedPriorityTree};
pub use session::TransactionTable;
pub use state::{EgressEvent, EgressState, IngressEvent, IngressState};
pub use time::{Clock, Instant, ManualClock, SystemClock};
pub use transaction::{ExAttributes, PrioritySummary, Transaction, TransactionContext};
pub use transport::{EgressWrite, HeadersWrite, ReplaySafetyCallback, TimeoutAction, Transport};
pub use types::{CodecInfo, CodecProtocol, StreamId, TransportDirection, TransportInfo, UpgradeProtocol};
