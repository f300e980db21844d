//! Hostpool Core - An HTTP/1.1 Host Connection Pool
//!
//! This crate manages a bounded set of outbound HTTP/1.1 connections to a
//! single host. Each connection position ("slot") is driven by a pure state
//! machine; a dispatcher routes requests to eligible slots, keeps a warm
//! floor of open connections, retries retryable failures, and merges the
//! per-slot results. TCP/TLS dialing and wire framing are supplied by the
//! embedding application through the [`Connector`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Callers                                │
//! │        request(HttpRequest) ──► ResponseHandle (future)          │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                     HOST CONNECTION POOL                         │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                        Dispatcher                          │  │
//! │  │   routing · warm floor · retry policy · result merging     │  │
//! │  └──┬──────────────────┬──────────────────┬───────────────────┘  │
//! │     │                  │                  │                      │
//! │  ┌──┴───┐           ┌──┴───┐           ┌──┴───┐                  │
//! │  │Slot 0│           │Slot 1│    ...    │Slot N│   (runtime per   │
//! │  │ rt+sm│           │ rt+sm│           │ rt+sm│    slot; sm is   │
//! │  └──┬───┘           └──┬───┘           └──┬───┘    pure)         │
//! └─────┼──────────────────┼──────────────────┼──────────────────────┘
//!       │                  │                  │
//!   Connector::connect() ── OutgoingConnection (external dial/framing)
//! ```
//!
//! # Key Types
//!
//! - [`HostConnectionPool`]: the pool itself; submit requests, shut down
//! - [`PoolSettings`]: slot count, warm floor, retry budget, timeouts
//! - [`Connector`] / [`OutgoingConnection`]: the external dial seam
//! - [`HttpRequest`] / [`HttpResponse`]: the message vocabulary
//! - [`SlotState`] / [`SlotEvent`] / [`SlotContext`]: the slot state
//!   machine, usable on its own for testing or embedding
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use hostpool_core::{HostConnectionPool, HttpRequest, PoolSettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connector = Arc::new(MyConnector::new("example.com:80"));
//!     let settings = PoolSettings::default()
//!         .with_max_connections(4)
//!         .with_min_connections(1);
//!     let pool = HostConnectionPool::new(connector, settings)?;
//!
//!     let handle = pool
//!         .request(HttpRequest::get("http://example.com/".parse()?))
//!         .await;
//!     let response = handle.await?;
//!     let body = response.entity.subscribe().collect_bytes().await?;
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`message`]: requests, responses, entities, connection semantics
//! - [`request`]: request contexts, promises, results
//! - [`connection`]: the connector seam and connection generations
//! - [`events`]: the slot event vocabulary
//! - [`slot`]: the slot runtime; [`slot::state`] holds the pure machine
//! - [`dispatcher`]: the pool API and request routing
//! - [`settings`]: pool configuration
//! - [`error`]: the failure taxonomy
//!
//! # Concurrency Model
//!
//! Transitions for one slot are totally ordered: every signal — dispatcher
//! command, connection event, timer, output readiness — passes through one
//! queue per slot. The state machine itself never suspends and never does
//! I/O; the enforcement tests in this workspace keep it that way.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod message;
pub mod request;
pub mod settings;
pub mod slot;

// Re-exports for convenience
pub use connection::{ConnectionGeneration, Connector, OutgoingConnection, RequestSink, ResponseSource};
pub use dispatcher::HostConnectionPool;
pub use error::{FailureCause, SettingsError, SlotFault};
pub use events::SlotEvent;
pub use message::{
    connection_must_close, EntityStream, HttpRequest, HttpResponse, RequestEntity, ResponseEntity,
    ResponseHead,
};
pub use request::{
    RequestContext, RequestInfo, ResponseContext, ResponseHandle, ResponsePromise, ResponseResult,
};
pub use settings::PoolSettings;
pub use slot::state::{SlotContext, SlotState};
