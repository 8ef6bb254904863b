//! Byte-level egress events and per-transaction byte accounting.
//!
//! The transport reports when interesting egress bytes are flushed to the
//! network and when the peer acknowledges them. The [`ByteEventTracker`]
//! records timings and byte counts and forwards each event to an optional
//! [`ByteEventObserver`]. Components that wait for such an event register it
//! in the pending counter first; a transaction is never torn down while that
//! counter is above zero.

use std::fmt;
use std::time::Duration;

use tracing::warn;

use crate::message::HeaderSize;
use crate::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteEventKind {
    FirstHeaderByte,
    FirstByte,
    LastByte,
    TrackedByte,
    BodyDelivered,
}

impl fmt::Display for ByteEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An event tied to one offset of the egress byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteEvent {
    pub kind: ByteEventKind,
    pub stream_offset: u64,
}

impl ByteEvent {
    pub fn new(kind: ByteEventKind, stream_offset: u64) -> Self {
        Self {
            kind,
            stream_offset,
        }
    }
}

/// Observer of a transaction's byte-level events.
///
/// Every method has a no-op default; implement the ones you need.
pub trait ByteEventObserver {
    fn first_header_byte_flushed(&mut self) {}
    fn first_byte_flushed(&mut self) {}
    fn last_byte_flushed(&mut self) {}
    fn tracked_byte_flushed(&mut self) {}
    fn last_byte_acked(&mut self, _latency: Duration) {}
    fn tracked_byte_event_tx(&mut self, _event: &ByteEvent) {}
    fn tracked_byte_event_ack(&mut self, _event: &ByteEvent) {}
    fn last_egress_header_byte_acked(&mut self) {}
    fn header_bytes_generated(&mut self, _size: &HeaderSize) {}
    fn header_bytes_received(&mut self, _size: &HeaderSize) {}
    fn body_bytes_generated(&mut self, _bytes: usize) {}
    fn body_bytes_received(&mut self, _bytes: usize) {}
    fn body_bytes_delivered(&mut self, _offset: u64) {}
    fn body_bytes_delivery_cancelled(&mut self, _offset: u64) {}
    fn egress_buffer_empty(&mut self) {}
}

/// Snapshot of a transaction's timings and byte counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionInfo {
    pub time_to_first_header_byte: Option<Duration>,
    pub time_to_first_byte: Option<Duration>,
    pub time_to_last_byte: Option<Duration>,
    pub egress_header_bytes: u64,
    pub egress_body_bytes: u64,
    pub ingress_header_bytes: u64,
    pub ingress_body_bytes: u64,
}

pub struct ByteEventTracker {
    observer: Option<Box<dyn ByteEventObserver>>,
    pending: u32,
    started_at: Instant,
    first_header_byte_at: Option<Instant>,
    first_byte_at: Option<Instant>,
    last_byte_at: Option<Instant>,
    egress_header_bytes: u64,
    egress_body_bytes: u64,
    ingress_header_bytes: u64,
    ingress_body_bytes: u64,
}

impl ByteEventTracker {
    pub fn new(started_at: Instant) -> Self {
        Self {
            observer: None,
            pending: 0,
            started_at,
            first_header_byte_at: None,
            first_byte_at: None,
            last_byte_at: None,
            egress_header_bytes: 0,
            egress_body_bytes: 0,
            ingress_header_bytes: 0,
            ingress_body_bytes: 0,
        }
    }

    pub fn set_observer(&mut self, observer: Option<Box<dyn ByteEventObserver>>) {
        self.observer = observer;
    }

    pub fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn increment_pending(&mut self) {
        self.add_pending(1);
    }

    pub fn add_pending(&mut self, count: u32) {
        self.pending = self.pending.saturating_add(count);
    }

    /// Returns false if nothing was pending.
    pub fn decrement_pending(&mut self) -> bool {
        if self.pending == 0 {
            warn!("byte event counter decremented below zero");
            return false;
        }
        self.pending -= 1;
        true
    }

    fn notify(&mut self, f: impl FnOnce(&mut dyn ByteEventObserver)) {
        if let Some(observer) = self.observer.as_deref_mut() {
            f(observer);
        }
    }

    // ------------------------------------------------------------------
    // Flush and ack notifications from the transport
    // ------------------------------------------------------------------

    pub fn on_first_header_byte(&mut self, now: Instant) {
        if self.first_header_byte_at.is_none() {
            self.first_header_byte_at = Some(now);
        }
        self.notify(|o| o.first_header_byte_flushed());
    }

    pub fn on_first_body_byte(&mut self, now: Instant) {
        if self.first_byte_at.is_none() {
            self.first_byte_at = Some(now);
        }
        self.notify(|o| o.first_byte_flushed());
    }

    pub fn on_last_byte(&mut self, now: Instant) {
        self.last_byte_at = Some(now);
        self.notify(|o| o.last_byte_flushed());
    }

    pub fn on_tracked_byte(&mut self) {
        self.notify(|o| o.tracked_byte_flushed());
    }

    pub fn on_last_byte_acked(&mut self, latency: Duration) {
        self.notify(|o| o.last_byte_acked(latency));
    }

    pub fn on_tracked_event_tx(&mut self, event: &ByteEvent) {
        self.notify(|o| o.tracked_byte_event_tx(event));
    }

    pub fn on_tracked_event_ack(&mut self, event: &ByteEvent) {
        self.notify(|o| o.tracked_byte_event_ack(event));
    }

    pub fn on_last_header_byte_acked(&mut self) {
        self.notify(|o| o.last_egress_header_byte_acked());
    }

    pub fn on_body_delivered(&mut self, offset: u64) {
        self.notify(|o| o.body_bytes_delivered(offset));
    }

    pub fn on_body_delivery_cancelled(&mut self, offset: u64) {
        self.notify(|o| o.body_bytes_delivery_cancelled(offset));
    }

    pub fn on_egress_buffer_empty(&mut self) {
        self.notify(|o| o.egress_buffer_empty());
    }

    // ------------------------------------------------------------------
    // Byte accounting
    // ------------------------------------------------------------------

    pub fn header_bytes_generated(&mut self, size: HeaderSize) {
        self.egress_header_bytes += size.compressed;
        self.notify(|o| o.header_bytes_generated(&size));
    }

    pub fn header_bytes_received(&mut self, size: HeaderSize) {
        self.ingress_header_bytes += size.compressed;
        self.notify(|o| o.header_bytes_received(&size));
    }

    pub fn body_bytes_generated(&mut self, bytes: usize) {
        self.egress_body_bytes += bytes as u64;
        self.notify(|o| o.body_bytes_generated(bytes));
    }

    pub fn body_bytes_received(&mut self, bytes: usize) {
        self.ingress_body_bytes += bytes as u64;
        self.notify(|o| o.body_bytes_received(bytes));
    }

    pub fn info(&self) -> TransactionInfo {
        let since_start = |at: Option<Instant>| at.map(|t| t.saturating_duration_since(self.started_at));
        TransactionInfo {
            time_to_first_header_byte: since_start(self.first_header_byte_at),
            time_to_first_byte: since_start(self.first_byte_at),
            time_to_last_byte: since_start(self.last_byte_at),
            egress_header_bytes: self.egress_header_bytes,
            egress_body_bytes: self.egress_body_bytes,
            ingress_header_bytes: self.ingress_header_bytes,
            ingress_body_bytes: self.ingress_body_bytes,
        }
    }
}

impl fmt::Debug for ByteEventTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteEventTracker")
            .field("pending", &self.pending)
            .field("has_observer", &self.observer.is_some())
            .field("egress_body_bytes", &self.egress_body_bytes)
            .field("ingress_body_bytes", &self.ingress_body_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log(Rc<RefCell<Vec<String>>>);

    impl ByteEventObserver for Log {
        fn first_byte_flushed(&mut self) {
            self.0.borrow_mut().push("first".into());
        }
        fn last_byte_acked(&mut self, latency: Duration) {
            self.0.borrow_mut().push(format!("acked {}ms", latency.as_millis()));
        }
        fn body_bytes_generated(&mut self, bytes: usize) {
            self.0.borrow_mut().push(format!("body {}", bytes));
        }
    }

    #[test]
    fn test_pending_counter_never_underflows() {
        let mut tracker = ByteEventTracker::new(Instant::ZERO);
        assert!(!tracker.decrement_pending());
        tracker.increment_pending();
        tracker.increment_pending();
        assert!(tracker.decrement_pending());
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn test_events_reach_observer() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut tracker = ByteEventTracker::new(Instant::ZERO);
        tracker.set_observer(Some(Box::new(Log(log.clone()))));

        tracker.body_bytes_generated(10);
        tracker.on_first_body_byte(Instant::from_millis(3));
        tracker.on_tracked_byte();
        tracker.on_last_byte_acked(Duration::from_millis(40));

        assert_eq!(*log.borrow(), vec!["body 10", "first", "acked 40ms"]);
    }

    #[test]
    fn test_info_timings() {
        let mut tracker = ByteEventTracker::new(Instant::from_millis(10));
        tracker.on_first_header_byte(Instant::from_millis(12));
        tracker.on_first_body_byte(Instant::from_millis(15));
        tracker.on_first_body_byte(Instant::from_millis(99));
        tracker.on_last_byte(Instant::from_millis(30));
        tracker.header_bytes_generated(HeaderSize {
            compressed: 20,
            uncompressed: 50,
        });
        tracker.body_bytes_received(7);

        let info = tracker.info();
        assert_eq!(info.time_to_first_header_byte, Some(Duration::from_millis(2)));
        assert_eq!(info.time_to_first_byte, Some(Duration::from_millis(5)));
        assert_eq!(info.time_to_last_byte, Some(Duration::from_millis(20)));
        assert_eq!(info.egress_header_bytes, 20);
        assert_eq!(info.ingress_body_bytes, 7);
    }
}
