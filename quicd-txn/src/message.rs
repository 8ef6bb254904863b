//! HTTP message heads exchanged through a transaction.
//!
//! A message is either a request (method and URI) or a response (status),
//! plus header fields. Bodies never live here; they flow through the
//! transaction as separate body events.

use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, StatusCode, Uri};

/// Encoded size of a header block, as reported by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderSize {
    /// Bytes on the wire after compression.
    pub compressed: u64,
    /// Bytes before compression.
    pub uncompressed: u64,
}

/// Request line or status line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageHead {
    Request { method: Method, uri: Uri },
    Response { status: StatusCode },
}

/// HTTP message head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    pub head: MessageHead,
    pub headers: HeaderMap,
    /// Body may be delivered with holes (skip/reject).
    pub partially_reliable: bool,
    /// Size of the header block this message arrived in, if it was received.
    pub ingress_header_size: HeaderSize,
}

impl HttpMessage {
    pub fn request(method: Method, uri: Uri) -> Self {
        Self {
            head: MessageHead::Request { method, uri },
            headers: HeaderMap::new(),
            partially_reliable: false,
            ingress_header_size: HeaderSize::default(),
        }
    }

    pub fn response(status: StatusCode) -> Self {
        Self {
            head: MessageHead::Response { status },
            headers: HeaderMap::new(),
            partially_reliable: false,
            ingress_header_size: HeaderSize::default(),
        }
    }

    /// Add a header. Invalid names or values are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            http::header::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_partial_reliability(mut self) -> Self {
        self.partially_reliable = true;
        self
    }

    pub fn is_request(&self) -> bool {
        matches!(self.head, MessageHead::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.head, MessageHead::Response { .. })
    }

    pub fn method(&self) -> Option<&Method> {
        match &self.head {
            MessageHead::Request { method, .. } => Some(method),
            MessageHead::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match &self.head {
            MessageHead::Response { status } => Some(*status),
            MessageHead::Request { .. } => None,
        }
    }

    /// Status as a plain integer, 0 for requests.
    pub fn status_code(&self) -> u16 {
        self.status().map(|s| s.as_u16()).unwrap_or(0)
    }

    /// Single Content-Length value, if present and well formed.
    pub fn content_length(&self) -> Option<u64> {
        let mut values = self.headers.get_all(CONTENT_LENGTH).iter();
        let first = values.next()?;
        if values.next().is_some() {
            return None;
        }
        first.to_str().ok()?.trim().parse().ok()
    }

    /// Whether a body may follow this message head.
    ///
    /// `head_request` is true when the request that this response answers
    /// was a HEAD request.
    pub fn may_have_body(&self, head_request: bool) -> bool {
        match &self.head {
            MessageHead::Request { method, .. } => *method != Method::CONNECT,
            MessageHead::Response { status } => {
                !head_request && !response_body_must_be_empty(status.as_u16())
            }
        }
    }
}

/// 1xx, 204 and 304 responses never carry a body.
pub fn response_body_must_be_empty(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}
