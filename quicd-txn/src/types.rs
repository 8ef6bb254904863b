//! Identifiers and descriptors shared between transactions and their transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unique identifier for a stream within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl StreamId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the exchange this endpoint plays.
///
/// Upstream transactions send requests (client role); downstream
/// transactions receive them (server role).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDirection {
    Upstream,
    Downstream,
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportDirection::Upstream => write!(f, "upstream"),
            TransportDirection::Downstream => write!(f, "downstream"),
        }
    }
}

/// Wire protocol spoken by the codec under a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecProtocol {
    Http1,
    Http2,
    /// QUIC-based mapping (HTTP/3 and HQ).
    Hq,
}

impl CodecProtocol {
    /// Whether `id` was opened by the client under this protocol's numbering.
    pub fn is_client_initiated(self, id: StreamId) -> bool {
        match self {
            CodecProtocol::Http1 => true,
            CodecProtocol::Http2 => id.0 % 2 == 1,
            CodecProtocol::Hq => id.0 & 0x1 == 0,
        }
    }
}

/// Capabilities of the codec behind a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecInfo {
    pub protocol: CodecProtocol,
    /// More than one transaction may be open at a time.
    pub supports_parallel_requests: bool,
    pub supports_push: bool,
    pub supports_ex_transactions: bool,
}

impl CodecInfo {
    pub fn http1() -> Self {
        Self {
            protocol: CodecProtocol::Http1,
            supports_parallel_requests: false,
            supports_push: false,
            supports_ex_transactions: false,
        }
    }

    pub fn http2() -> Self {
        Self {
            protocol: CodecProtocol::Http2,
            supports_parallel_requests: true,
            supports_push: true,
            supports_ex_transactions: true,
        }
    }

    pub fn hq() -> Self {
        Self {
            protocol: CodecProtocol::Hq,
            supports_parallel_requests: true,
            supports_push: true,
            supports_ex_transactions: false,
        }
    }
}

/// Connection-level transport details reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportInfo {
    pub rtt: Option<Duration>,
    pub rtt_var: Option<Duration>,
    pub cwnd_bytes: Option<u64>,
    pub mss: Option<u32>,
    pub bytes_retransmitted: u64,
    pub security_protocol: Option<String>,
    pub application_protocol: Option<String>,
}

/// Protocol a stream upgraded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeProtocol {
    Tcp,
    WebSocket,
    Tls,
    Other(String),
}

impl fmt::Display for UpgradeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeProtocol::Tcp => write!(f, "tcp"),
            UpgradeProtocol::WebSocket => write!(f, "websocket"),
            UpgradeProtocol::Tls => write!(f, "tls"),
            UpgradeProtocol::Other(name) => write!(f, "{}", name),
        }
    }
}
