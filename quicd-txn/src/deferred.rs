//! Buffers for work a transaction cannot do yet.
//!
//! [`DeferredIngress`] holds received events while the handler has paused
//! ingress. [`DeferredEgress`] holds body bytes the handler has submitted
//! but that cannot be written yet because of flow control, rate limiting or
//! transport backpressure. Both are strictly FIFO.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use thiserror::Error;

use crate::message::HttpMessage;
use crate::types::UpgradeProtocol;

// ============================================================================
// Deferred ingress
// ============================================================================

/// A received event waiting for the handler to resume ingress.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedIngress {
    Headers(HttpMessage),
    Body(Bytes),
    ChunkHeader(usize),
    ChunkComplete,
    Trailers(HeaderMap),
    Upgrade(UpgradeProtocol),
    Eom,
}

impl QueuedIngress {
    pub fn name(&self) -> &'static str {
        match self {
            QueuedIngress::Headers(_) => "headers",
            QueuedIngress::Body(_) => "body",
            QueuedIngress::ChunkHeader(_) => "chunk_header",
            QueuedIngress::ChunkComplete => "chunk_complete",
            QueuedIngress::Trailers(_) => "trailers",
            QueuedIngress::Upgrade(_) => "upgrade",
            QueuedIngress::Eom => "eom",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("deferred ingress queue full ({limit} events)")]
pub struct QueueFull {
    pub limit: usize,
}

/// Bounded FIFO of ingress events received while paused.
#[derive(Debug, Clone)]
pub struct DeferredIngress {
    queue: VecDeque<QueuedIngress>,
    limit: usize,
    high_water: usize,
}

impl DeferredIngress {
    pub fn new(limit: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            limit,
            high_water: 0,
        }
    }

    pub fn push(&mut self, event: QueuedIngress) -> Result<(), QueueFull> {
        if self.queue.len() >= self.limit {
            return Err(QueueFull { limit: self.limit });
        }
        self.queue.push_back(event);
        self.high_water = self.high_water.max(self.queue.len());
        Ok(())
    }

    pub fn pop(&mut self) -> Option<QueuedIngress> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Largest number of events ever queued at once.
    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    /// Drop everything still queued. Returns the number of body bytes
    /// discarded, so receive credit can be accounted for.
    pub fn clear(&mut self) -> usize {
        let bytes = self
            .queue
            .iter()
            .map(|event| match event {
                QueuedIngress::Body(data) => data.len(),
                _ => 0,
            })
            .sum();
        self.queue.clear();
        bytes
    }
}

// ============================================================================
// Deferred egress
// ============================================================================

/// Explicit chunk framing waiting to be written with its body bytes.
///
/// Only serial codecs (HTTP/1.1) frame chunks themselves; multiplexed
/// codecs never queue these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChunk {
    /// Body bytes of this chunk not yet written.
    pub remaining: usize,
    pub header_sent: bool,
}

/// FIFO of body bytes waiting to be written.
#[derive(Debug, Clone, Default)]
pub struct DeferredEgress {
    segments: VecDeque<Bytes>,
    len: usize,
    chunks: VecDeque<PendingChunk>,
}

impl DeferredEgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn append(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.segments.push_back(data);
    }

    /// Remove and return up to `max` bytes from the front, in order.
    pub fn split_to(&mut self, max: usize) -> Bytes {
        let want = max.min(self.len);
        if want == 0 {
            return Bytes::new();
        }

        // Fast path: the front segment covers the request.
        if let Some(front) = self.segments.front_mut() {
            if front.len() >= want {
                let out = front.split_to(want);
                if front.is_empty() {
                    self.segments.pop_front();
                }
                self.len -= want;
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(want);
        while out.len() < want {
            let Some(mut front) = self.segments.pop_front() else {
                break;
            };
            let take = (want - out.len()).min(front.len());
            out.extend_from_slice(&front.split_to(take));
            if !front.is_empty() {
                self.segments.push_front(front);
            }
        }
        self.len -= out.len();
        out.freeze()
    }

    /// Discard up to `amount` bytes from the front. Returns the number
    /// actually discarded.
    pub fn trim_front(&mut self, amount: usize) -> usize {
        let mut trimmed = 0;
        while trimmed < amount {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            let take = (amount - trimmed).min(front.len());
            let _ = front.split_to(take);
            trimmed += take;
            if front.is_empty() {
                self.segments.pop_front();
            }
        }
        self.len -= trimmed;
        trimmed
    }

    /// Drop all buffered bytes and chunk framing. Returns bytes dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len;
        self.segments.clear();
        self.chunks.clear();
        self.len = 0;
        dropped
    }

    pub fn push_chunk(&mut self, length: usize) {
        self.chunks.push_back(PendingChunk {
            remaining: length,
            header_sent: false,
        });
    }

    pub fn front_chunk_mut(&mut self) -> Option<&mut PendingChunk> {
        self.chunks.front_mut()
    }

    pub fn pop_chunk(&mut self) -> Option<PendingChunk> {
        self.chunks.pop_front()
    }

    pub fn has_chunks(&self) -> bool {
        !self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_queue_is_fifo_and_bounded() {
        let mut queue = DeferredIngress::new(3);
        queue.push(QueuedIngress::ChunkHeader(5)).unwrap();
        queue.push(QueuedIngress::Body(Bytes::from_static(b"hello"))).unwrap();
        queue.push(QueuedIngress::ChunkComplete).unwrap();
        assert_eq!(
            queue.push(QueuedIngress::Eom),
            Err(QueueFull { limit: 3 })
        );

        assert_eq!(queue.pop(), Some(QueuedIngress::ChunkHeader(5)));
        assert_eq!(queue.pop().map(|e| e.name()), Some("body"));
        assert_eq!(queue.high_water_mark(), 3);
    }

    #[test]
    fn test_ingress_clear_counts_body_bytes() {
        let mut queue = DeferredIngress::new(8);
        queue.push(QueuedIngress::Body(Bytes::from_static(b"abc"))).unwrap();
        queue.push(QueuedIngress::Trailers(HeaderMap::new())).unwrap();
        queue.push(QueuedIngress::Body(Bytes::from_static(b"de"))).unwrap();
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_egress_split_preserves_order_across_segments() {
        let mut buf = DeferredEgress::new();
        buf.append(Bytes::from_static(b"abc"));
        buf.append(Bytes::from_static(b"defg"));
        buf.append(Bytes::from_static(b"h"));
        assert_eq!(buf.len(), 8);

        assert_eq!(&buf.split_to(2)[..], b"ab");
        assert_eq!(&buf.split_to(4)[..], b"cdef");
        assert_eq!(&buf.split_to(100)[..], b"gh");
        assert!(buf.is_empty());
        assert!(buf.split_to(1).is_empty());
    }

    #[test]
    fn test_egress_trim_front() {
        let mut buf = DeferredEgress::new();
        buf.append(Bytes::from_static(b"0123"));
        buf.append(Bytes::from_static(b"4567"));
        assert_eq!(buf.trim_front(5), 5);
        assert_eq!(&buf.split_to(10)[..], b"567");
        assert_eq!(buf.trim_front(1), 0);
    }

    #[test]
    fn test_chunk_bookkeeping() {
        let mut buf = DeferredEgress::new();
        buf.push_chunk(10);
        assert!(buf.has_chunks());
        if let Some(chunk) = buf.front_chunk_mut() {
            chunk.header_sent = true;
            chunk.remaining -= 4;
        }
        assert_eq!(
            buf.pop_chunk(),
            Some(PendingChunk {
                remaining: 6,
                header_sent: true
            })
        );
        assert!(!buf.has_chunks());
    }
}
