//! # Core Types Module
//!
//! Message and transaction types the cache mediator works with. These stand in
//! for the host pipeline's own message context: the host builds a
//! [`MessageContext`] per transaction, passes it through the request phase,
//! and hands the very same context back for the response phase.
//!
//! ## Ownership
//!
//! - A `MessageContext` is owned by exactly one in-flight transaction and is
//!   passed by `&mut` to each mediator; nothing in it is shared.
//! - Bodies are `bytes::Bytes`, so swapping a cached payload into a context is
//!   a reference-count bump rather than a copy.

use bytes::Bytes;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

use crate::caching::correlation::CorrelationSlot;

/// Which way a message is flowing through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Outbound request, before the downstream call
    Request,
    /// Response coming back from downstream
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "request"),
            Direction::Response => write!(f, "response"),
        }
    }
}

/// Transport style of the mediated message
///
/// REST-style transports carry discrete transport headers that have to be
/// captured next to the payload; envelope-style transports carry everything
/// inside the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// Envelope transport, headers travel inside the body
    Envelope,
    /// REST transport with discrete transport headers
    Rest,
}

/// A message body together with its transport headers
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Transport headers
    pub headers: HeaderMap,

    /// Serialized body
    pub body: Bytes,

    /// Message type used by the host to pick a formatter (e.g. `application/json`)
    pub message_type: Option<String>,
}

impl Message {
    /// Create a message from a body with no headers
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: HeaderMap::new(),
            body: body.into(),
            message_type: None,
        }
    }

    /// Set the message type
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Add a transport header, ignoring names or values that are not valid HTTP
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<http::HeaderName>(),
            value.parse::<http::HeaderValue>(),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Get a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Content type, from the message type or the `content-type` header
    pub fn content_type(&self) -> Option<&str> {
        self.message_type
            .as_deref()
            .or_else(|| self.header("content-type"))
    }

    /// Size of the serialized body in bytes
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Per-transaction context threaded through the request and response phases
#[derive(Debug)]
pub struct MessageContext {
    /// Unique message id, used for log correlation only (never for fingerprints)
    pub id: String,

    /// Current direction of the message
    pub direction: Direction,

    /// Transport style
    pub transport: Transport,

    /// Destination address of the request; cleared when a cached response is sent back
    pub to: Option<String>,

    /// The current message: the request during the request phase, the
    /// downstream (or cached) response afterwards
    pub message: Message,

    /// Host-provided estimate of the eventual response size, when knowable up front
    pub response_size_hint: Option<usize>,

    /// Free-form properties that mediators can set
    pub properties: HashMap<String, serde_json::Value>,

    /// Correlation between the request-phase lookup and response-phase population
    pub correlation: CorrelationSlot,

    /// When the transaction entered the pipeline
    pub received_at: Instant,
}

impl MessageContext {
    /// Create a request-phase context
    pub fn request(transport: Transport, to: Option<String>, message: Message) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            direction: Direction::Request,
            transport,
            to,
            message,
            response_size_hint: None,
            properties: HashMap::new(),
            correlation: CorrelationSlot::default(),
            received_at: Instant::now(),
        }
    }

    /// Create a REST request context
    pub fn rest_request(to: impl Into<String>, message: Message) -> Self {
        Self::request(Transport::Rest, Some(to.into()), message)
    }

    /// Whether the context currently carries a response
    pub fn is_response(&self) -> bool {
        self.direction == Direction::Response
    }

    /// Whether the transport uses discrete transport headers
    pub fn is_rest(&self) -> bool {
        self.transport == Transport::Rest
    }

    /// Turn the context around with the downstream response
    ///
    /// The correlation slot survives the turn; that is what links the two phases.
    pub fn set_response(&mut self, response: Message) {
        self.direction = Direction::Response;
        self.message = response;
    }

    /// Set the estimated response size
    pub fn with_response_size_hint(mut self, size: usize) -> Self {
        self.response_size_hint = Some(size);
        self
    }

    /// Set a context property
    pub fn set_property(&mut self, name: &str, value: serde_json::Value) {
        self.properties.insert(name.to_string(), value);
    }

    /// Get a context property
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }
}
