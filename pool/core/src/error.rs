//! Error Types
//!
//! The failure taxonomy for the pool. `FailureCause` is the value that
//! travels with failed requests: it is carried in response results, logged,
//! and injected into abandoned entity streams. `SettingsError` reports
//! invalid configuration, `SlotFault` reports an illegal event for the
//! current slot state (a bug, not a recoverable condition).

use std::time::Duration;

use thiserror::Error;

/// Why a request (or its entity stream) failed.
///
/// Variants map one-to-one onto the failure classes the pool distinguishes
/// when deciding between retrying a request and reporting the error to the
/// caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FailureCause {
    /// TCP/TLS session could not be established.
    #[error("connection attempt failed: {0}")]
    Dial(String),

    /// The request entity stream errored before the request was fully sent.
    #[error("request entity stream failed: {0}")]
    RequestEntity(String),

    /// Malformed response or unexpected close while a request was in flight.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// The response entity stream errored after the response head was
    /// already handed to the caller.
    #[error("response entity stream failed: {0}")]
    ResponseEntity(String),

    /// The caller did not subscribe to the response entity within the
    /// configured window; the connection was dropped.
    #[error("response entity not subscribed within {}ms", .0.as_millis())]
    SubscriptionTimeout(Duration),

    /// The pool is shutting down; the request was abandoned.
    #[error("connection pool is shutting down")]
    Shutdown,
}

impl FailureCause {
    /// True when the failure happened before any response was determined,
    /// i.e. when re-sending the request on a fresh connection could
    /// succeed. The dispatcher only re-enqueues failures of these classes.
    #[must_use]
    pub fn is_pre_response(&self) -> bool {
        matches!(
            self,
            Self::Dial(_) | Self::RequestEntity(_) | Self::Protocol(_)
        )
    }
}

/// Invalid [`PoolSettings`](crate::settings::PoolSettings).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// `max_connections` was zero; a pool needs at least one slot.
    #[error("max_connections must be at least 1")]
    NoConnections,

    /// `min_connections` exceeded `max_connections`.
    #[error("min_connections ({min}) exceeds max_connections ({max})")]
    MinAboveMax {
        /// Configured warm-connection floor.
        min: usize,
        /// Configured slot count.
        max: usize,
    },

    /// A pipelining limit other than 1 was requested. This pool sends one
    /// request per connection at a time.
    #[error("pipelining_limit {0} is not supported; only 1 request per connection is in flight")]
    PipeliningUnsupported(usize),
}

/// An event arrived in a state that does not accept it.
///
/// This is an assertion about pool-internal wiring: every legal event flow
/// is enumerated in the slot state machine, so hitting this means a bug.
/// The runtime logs it and tears the slot down; it is never a recovery path.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("slot received {event} while {state}; this is a bug in the pool wiring")]
pub struct SlotFault {
    /// Name of the state the slot was in.
    pub state: &'static str,
    /// Name of the offending event.
    pub event: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_cause_display_names_the_class() {
        let cause = FailureCause::Dial("connection refused".to_string());
        assert_eq!(
            cause.to_string(),
            "connection attempt failed: connection refused"
        );

        let cause = FailureCause::SubscriptionTimeout(Duration::from_secs(1));
        assert_eq!(cause.to_string(), "response entity not subscribed within 1000ms");
    }

    #[test]
    fn pre_response_failures_are_the_retryable_classes() {
        assert!(FailureCause::Dial(String::new()).is_pre_response());
        assert!(FailureCause::RequestEntity(String::new()).is_pre_response());
        assert!(FailureCause::Protocol(String::new()).is_pre_response());
        assert!(!FailureCause::ResponseEntity(String::new()).is_pre_response());
        assert!(!FailureCause::SubscriptionTimeout(Duration::ZERO).is_pre_response());
        assert!(!FailureCause::Shutdown.is_pre_response());
    }

    #[test]
    fn slot_fault_names_state_and_event() {
        let fault = SlotFault {
            state: "idle",
            event: "response-received",
        };
        assert!(fault.to_string().contains("idle"));
        assert!(fault.to_string().contains("response-received"));
    }
}
