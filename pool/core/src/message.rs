//! HTTP Messages
//!
//! Request and response value types exchanged with the pool, plus the
//! HTTP/1.1 connection-persistence predicate. Wire parsing and framing are
//! not done here; these types are the vocabulary shared between the caller,
//! the slots, and the connection collaborator.
//!
//! # Entities
//!
//! A request entity is described up front (`Empty`, `Strict` bytes, or a
//! `Streamed` descriptor) so the pool can judge replayability for retries.
//! A response entity arrives as a chunk stream that stays dormant until the
//! caller [`subscribe`](ResponseEntity::subscribe)s; subscription is a
//! signal the owning slot relies on to know the response is being consumed.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::FailureCause;

/// The entity (body) of an outgoing request.
#[derive(Clone, Debug)]
pub enum RequestEntity {
    /// No body.
    Empty,
    /// A fully buffered body; always replayable.
    Strict(Bytes),
    /// A body produced incrementally by the caller.
    Streamed {
        /// Declared length, if known.
        length: Option<u64>,
        /// Whether the producer can restart the stream from the beginning.
        replayable: bool,
    },
}

impl RequestEntity {
    /// True when the entity can be sent again from the start, which is a
    /// precondition for retrying the request on a fresh connection.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        match self {
            Self::Empty | Self::Strict(_) => true,
            Self::Streamed { replayable, .. } => *replayable,
        }
    }
}

/// An outgoing HTTP request.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Request target.
    pub uri: Uri,
    /// Protocol version; defaults to HTTP/1.1.
    pub version: Version,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request entity.
    pub entity: RequestEntity,
}

impl HttpRequest {
    /// Create a request with the given method and target.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            entity: RequestEntity::Empty,
        }
    }

    /// Shorthand for a GET request.
    #[must_use]
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the entity.
    #[must_use]
    pub fn with_entity(mut self, entity: RequestEntity) -> Self {
        self.entity = entity;
        self
    }

    /// Set the protocol version.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Whether the method is idempotent per HTTP semantics, i.e. safe to
    /// send a second time when the first attempt may already have executed.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        self.method == Method::GET
            || self.method == Method::HEAD
            || self.method == Method::OPTIONS
            || self.method == Method::TRACE
            || self.method == Method::PUT
            || self.method == Method::DELETE
    }
}

/// The head of a received response: everything except the entity.
///
/// Cheap to clone; the slot keeps a copy after the full response has been
/// handed to the caller, for logging and the connection-reuse decision.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseHead {
    /// Response status.
    pub status: StatusCode,
    /// Protocol version the server answered with.
    pub version: Version,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Create a response head with the given status, HTTP/1.1, no headers.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the protocol version.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }
}

/// A received HTTP response: head plus the (not yet consumed) entity.
#[derive(Debug)]
pub struct HttpResponse {
    /// Status line and headers.
    pub head: ResponseHead,
    /// The entity stream handle.
    pub entity: ResponseEntity,
}

// The entity stream handle has no meaningful notion of equality, so
// `HttpResponse` equality is defined in terms of the response head only.
impl PartialEq for HttpResponse {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head
    }
}

/// Decide whether the connection must be closed after this exchange,
/// per HTTP/1.1 connection semantics: an explicit `Connection: close`,
/// an HTTP/1.0 response without `keep-alive`, or a CONNECT request
/// (which converts the connection to a tunnel).
#[must_use]
pub fn connection_must_close(request_method: &Method, response: &ResponseHead) -> bool {
    if *request_method == Method::CONNECT {
        return true;
    }
    if connection_header_has_token(&response.headers, "close") {
        return true;
    }
    if response.version == Version::HTTP_10
        && !connection_header_has_token(&response.headers, "keep-alive")
    {
        return true;
    }
    false
}

fn connection_header_has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case(token))
}

/// The unconsumed entity of a dispatched response.
///
/// The stream of chunks stays buffered until the caller calls
/// [`subscribe`](Self::subscribe), which signals the owning slot that the
/// entity is being read. A response whose entity is never subscribed is
/// reclaimed by the slot after the configured subscription timeout.
pub struct ResponseEntity {
    chunks: mpsc::Receiver<Result<Bytes, FailureCause>>,
    subscribed: Option<watch::Sender<bool>>,
}

impl ResponseEntity {
    pub(crate) fn new(
        chunks: mpsc::Receiver<Result<Bytes, FailureCause>>,
        subscribed: watch::Sender<bool>,
    ) -> Self {
        Self {
            chunks,
            subscribed: Some(subscribed),
        }
    }

    /// Start consuming the entity. Signals the pool that the response is
    /// being read and returns the chunk stream.
    #[must_use]
    pub fn subscribe(mut self) -> EntityStream {
        if let Some(subscribed) = self.subscribed.take() {
            // Receivers may already be gone if the slot gave up on us; the
            // buffered chunks (and the failure marker) are still readable.
            let _ = subscribed.send(true);
        }
        EntityStream {
            inner: ReceiverStream::new(self.chunks),
        }
    }
}

impl fmt::Debug for ResponseEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseEntity")
            .field("subscribed", &self.subscribed.is_none())
            .finish_non_exhaustive()
    }
}

/// The subscribed response entity: a stream of chunks terminated either by
/// the natural end of the entity or by a single failure item.
pub struct EntityStream {
    inner: ReceiverStream<Result<Bytes, FailureCause>>,
}

impl EntityStream {
    /// Receive the next chunk, or `None` at the end of the entity.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, FailureCause>> {
        self.inner.next().await
    }

    /// Drain the stream into one buffer, failing on the first error item.
    pub async fn collect_bytes(mut self) -> Result<Bytes, FailureCause> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected.freeze())
    }
}

impl futures::Stream for EntityStream {
    type Item = Result<Bytes, FailureCause>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl fmt::Debug for EntityStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStream").finish_non_exhaustive()
    }
}
