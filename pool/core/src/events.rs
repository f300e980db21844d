//! Slot Events
//!
//! Everything that can happen to a slot, as one enum. The slot runtime
//! serializes events from the dispatcher, the connection tasks, and its
//! timers into a single ordered queue; the state machine consumes them one
//! at a time.

use crate::error::FailureCause;
use crate::message::HttpResponse;
use crate::request::RequestContext;

/// An event delivered to a slot's state machine.
///
/// Events either originate from the dispatcher (`PreConnect`, `NewRequest`,
/// `Shutdown`), from the slot's connection (`ConnectionAttempt*`,
/// `RequestEntity*`, `Response*`, `Connection*`), or from the runtime's
/// timers and output port (`Timeout`, `ResponseDispatchable`).
#[derive(Debug)]
pub enum SlotEvent {
    // ============================================
    // Dispatcher commands
    // ============================================
    /// Open a connection ahead of demand (warm-connection floor).
    PreConnect,

    /// A request routed to this slot.
    NewRequest(RequestContext),

    /// The pool is shutting down; abandon any in-flight work.
    Shutdown,

    // ============================================
    // Connection lifecycle
    // ============================================
    /// The dial succeeded; the runtime now owns an open connection.
    ConnectionAttemptSucceeded,

    /// The dial failed.
    ConnectionAttemptFailed(FailureCause),

    /// The open connection closed in an orderly fashion (including locally
    /// applied idle and lifetime limits).
    ConnectionCompleted,

    /// The open connection failed.
    ConnectionFailed(FailureCause),

    // ============================================
    // Request entity progress
    // ============================================
    /// The request head and entity are fully on the wire.
    RequestEntityCompleted,

    /// The request entity stream failed before completion.
    RequestEntityFailed(FailureCause),

    // ============================================
    // Response progress
    // ============================================
    /// A response head (and entity handle) arrived.
    ResponseReceived(HttpResponse),

    /// The output port can accept one result; deliver the determined one.
    ResponseDispatchable,

    /// The caller subscribed to the dispatched response's entity.
    ResponseEntitySubscribed,

    /// The response entity was fully consumed.
    ResponseEntityCompleted,

    /// The response entity stream failed mid-consumption.
    ResponseEntityFailed(FailureCause),

    // ============================================
    // Timers
    // ============================================
    /// The current state's timeout elapsed.
    Timeout,
}

impl SlotEvent {
    /// Stable event name for log and fault messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreConnect => "pre-connect",
            Self::NewRequest(_) => "new-request",
            Self::Shutdown => "shutdown",
            Self::ConnectionAttemptSucceeded => "connection-attempt-succeeded",
            Self::ConnectionAttemptFailed(_) => "connection-attempt-failed",
            Self::ConnectionCompleted => "connection-completed",
            Self::ConnectionFailed(_) => "connection-failed",
            Self::RequestEntityCompleted => "request-entity-completed",
            Self::RequestEntityFailed(_) => "request-entity-failed",
            Self::ResponseReceived(_) => "response-received",
            Self::ResponseDispatchable => "response-dispatchable",
            Self::ResponseEntitySubscribed => "response-entity-subscribed",
            Self::ResponseEntityCompleted => "response-entity-completed",
            Self::ResponseEntityFailed(_) => "response-entity-failed",
            Self::Timeout => "timeout",
        }
    }
}
