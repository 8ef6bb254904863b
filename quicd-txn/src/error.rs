//! Error types for transaction processing.
//!
//! Errors raised on a transaction carry the direction they affect, the
//! transaction-level cause ([`ErrorKind`]) and, when the stream has to be
//! reset on the wire, the codec status code ([`ErrorCode`]) the transport
//! should put in the reset frame.

use std::fmt;
use thiserror::Error;

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, HttpError>;

/// Codec status codes used when resetting a stream.
///
/// Numbering follows the HTTP/2 error code registry; HTTP/3 codecs map these
/// onto their own code space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Wire value of this code.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value. Unknown values map to `InternalError`.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            _ => ErrorCode::InternalError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        };
        write!(f, "{}", name)
    }
}

/// Which half of the exchange an error affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
    IngressAndEgress,
}

impl Direction {
    pub fn affects_ingress(self) -> bool {
        matches!(self, Direction::Ingress | Direction::IngressAndEgress)
    }

    pub fn affects_egress(self) -> bool {
        matches!(self, Direction::Egress | Direction::IngressAndEgress)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
            Direction::IngressAndEgress => write!(f, "ingress+egress"),
        }
    }
}

/// Transaction-level cause of an error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Peer reset the stream.
    #[error("stream abort")]
    StreamAbort,

    /// No ingress arrived within the idle timeout.
    #[error("timeout")]
    Timeout,

    /// Timed out waiting for a send-window update.
    #[error("write timeout")]
    WriteTimeout,

    /// Body does not match the advertised Content-Length.
    #[error("body parse error")]
    ParseBody,

    /// Remote event not legal in the current ingress state.
    #[error("invalid ingress state transition")]
    IngressStateTransition,

    /// Flow-control accounting violated by the peer.
    #[error("flow control violation")]
    FlowControl,

    /// Too many ingress events queued while paused.
    #[error("deferred ingress queue overflow")]
    DeferredIngressOverflow,

    /// Transport read failure.
    #[error("read error")]
    Read,

    /// Transport write failure.
    #[error("write error")]
    Write,

    /// Connection closed before the message completed.
    #[error("unexpected end of stream")]
    Eof,

    /// Connection is going away.
    #[error("goaway")]
    Goaway,

    /// Operation not supported by the transport.
    #[error("unsupported")]
    Unsupported,
}

/// An error delivered to a transaction and, usually, its handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} ({direction}): {message}")]
pub struct HttpError {
    direction: Direction,
    kind: ErrorKind,
    codec_code: Option<ErrorCode>,
    message: String,
}

impl HttpError {
    pub fn new(direction: Direction, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            direction,
            kind,
            codec_code: None,
            message: message.into(),
        }
    }

    pub fn ingress(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(Direction::Ingress, kind, message)
    }

    pub fn egress(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(Direction::Egress, kind, message)
    }

    pub fn both(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(Direction::IngressAndEgress, kind, message)
    }

    /// Peer reset with the given code. Never triggers an outbound reset.
    pub fn stream_abort(code: ErrorCode) -> Self {
        Self::both(ErrorKind::StreamAbort, format!("stream reset by peer: {}", code))
            .with_codec_code(code)
    }

    /// Attach the code the transport should reset the stream with.
    pub fn with_codec_code(mut self, code: ErrorCode) -> Self {
        self.codec_code = Some(code);
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn codec_code(&self) -> Option<ErrorCode> {
        self.codec_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }
}
