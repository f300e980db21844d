//! Connection Collaborator Interface
//!
//! The pool does not dial sockets or speak HTTP/1.1 on the wire; it drives
//! an external collaborator through the traits in this module. A
//! [`Connector`] produces an [`OutgoingConnection`] whose two halves can be
//! used concurrently: the request may still be streaming out while the
//! response is already coming back.
//!
//! Every event a connection produces is stamped with the slot's current
//! [`ConnectionGeneration`] before it re-enters the slot's event queue, so
//! signals from an abandoned connection can never be mistaken for signals
//! from its successor.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FailureCause;
use crate::message::{HttpRequest, ResponseHead};

/// Identifies one connection attempt within a slot. Events stamped with a
/// generation other than the slot's current one are stale and dropped at
/// the runtime boundary.
pub type ConnectionGeneration = u64;

/// Dials one outbound connection to the pool's host.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a TCP (optionally TLS) session and return its two halves.
    async fn connect(&self) -> Result<OutgoingConnection, FailureCause>;
}

/// The write half of a connection: accepts one request at a time.
#[async_trait]
pub trait RequestSink: Send {
    /// Write the request head and stream its entity. Resolves once the
    /// request is fully on the wire, or fails with a request-entity error.
    async fn send_request(&mut self, request: HttpRequest) -> Result<(), FailureCause>;
}

/// The read half of a connection: yields response heads and entity chunks.
#[async_trait]
pub trait ResponseSource: Send {
    /// Read the next response head. Fails on malformed input or when the
    /// peer closes the connection.
    async fn read_response_head(&mut self) -> Result<ResponseHead, FailureCause>;

    /// Read the next chunk of the current response entity; `Ok(None)`
    /// marks the end of the entity.
    async fn read_entity_chunk(&mut self) -> Result<Option<Bytes>, FailureCause>;
}

/// An established connection, split so writing and reading can proceed
/// concurrently. Owned exclusively by one slot runtime; the slot state
/// machine never sees it.
pub struct OutgoingConnection {
    /// Request write half.
    pub writer: Box<dyn RequestSink>,
    /// Response read half.
    pub reader: Box<dyn ResponseSource>,
}

impl OutgoingConnection {
    /// Pair two halves into a connection.
    #[must_use]
    pub fn new(writer: Box<dyn RequestSink>, reader: Box<dyn ResponseSource>) -> Self {
        Self { writer, reader }
    }
}

impl std::fmt::Debug for OutgoingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingConnection").finish_non_exhaustive()
    }
}
