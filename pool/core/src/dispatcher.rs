//! Dispatcher
//!
//! [`HostConnectionPool`] is the public face of the pool: it validates the
//! settings, spawns one runtime per slot, and runs a single dispatcher task
//! that owns the routing table. The dispatcher routes each incoming request
//! to an eligible slot (connected and idle first, then an unconnected slot
//! that dials for it), keeps the warm-connection floor, merges the per-slot
//! results, applies the retry policy, and settles every promise on
//! shutdown.
//!
//! Requests enter through a bounded intake channel that the dispatcher only
//! drains while a slot is available, so callers experience backpressure
//! when the pool is saturated.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;

use crate::connection::Connector;
use crate::error::{FailureCause, SettingsError};
use crate::message::HttpRequest;
use crate::request::{RequestContext, ResponseContext, ResponseHandle};
use crate::settings::PoolSettings;
use crate::slot::{spawn_slot, SlotCommand, SlotFeedback, SlotInput, SlotPorts};

/// An HTTP/1.1 connection pool for a single host.
///
/// Construction spawns the dispatcher and slot tasks, so it must happen
/// inside a tokio runtime. Dropping the pool (or calling
/// [`shutdown`](Self::shutdown)) abandons in-flight work with a
/// [`FailureCause::Shutdown`] failure.
pub struct HostConnectionPool {
    intake_tx: mpsc::Sender<RequestContext>,
    control_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    settings: PoolSettings,
}

impl HostConnectionPool {
    /// Validate the settings and start the pool against the given
    /// connector.
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: PoolSettings,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let shared = Arc::new(settings.clone());

        // One routable request per slot before intake pushes back.
        let (intake_tx, intake_rx) = mpsc::channel(settings.max_connections);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::channel(settings.max_connections);
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();

        let slots = (0..settings.max_connections)
            .map(|id| SlotEntry {
                ports: spawn_slot(
                    id,
                    Arc::clone(&shared),
                    Arc::clone(&connector),
                    results_tx.clone(),
                    feedback_tx.clone(),
                ),
                sent_seq: 0,
                connected: false,
                accepting: true,
                established: false,
                warming: false,
            })
            .collect();

        let dispatcher = Dispatcher {
            settings: shared,
            connector,
            slots,
            pending: VecDeque::new(),
            intake_rx,
            control_rx,
            results_rx,
            results_tx,
            feedback_rx,
            feedback_tx,
            warm_retry: None,
            warm_failures: 0,
        };
        tokio::spawn(dispatcher.run());

        Ok(Self {
            intake_tx,
            control_tx,
            settings,
        })
    }

    /// Submit a request. Suspends while the pool is saturated; the returned
    /// handle resolves once the request has a response or a final failure.
    pub async fn request(&self, request: HttpRequest) -> ResponseHandle {
        let (context, handle) = RequestContext::new(request, self.settings.max_retries);
        if self.intake_tx.send(context).await.is_err() {
            // The dropped context settles the handle with a shutdown
            // failure.
            tracing::debug!("request submitted to a pool that is shutting down");
        }
        handle
    }

    /// The validated settings this pool runs with.
    #[must_use]
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Shut the pool down: cancel slot work, close connections, and settle
    /// every outstanding request with [`FailureCause::Shutdown`]. Resolves
    /// once the dispatcher has finished.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control_tx.send(ack_tx).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

impl std::fmt::Debug for HostConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConnectionPool")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Dispatcher-side view of one slot.
struct SlotEntry {
    ports: SlotPorts,
    /// Sequence number of the last command sent to this slot. Status
    /// reports acking an older number are stale and not used for routing.
    sent_seq: u64,
    connected: bool,
    accepting: bool,
    /// The connection is actually open, not merely being dialed.
    established: bool,
    /// A warm-floor dial is in flight and its outcome is not yet known.
    warming: bool,
}

enum Wake {
    Control(Option<oneshot::Sender<()>>),
    Feedback(SlotFeedback),
    Result(ResponseContext),
    Intake(Option<RequestContext>),
    WarmRetry,
}

struct Dispatcher {
    settings: Arc<PoolSettings>,
    connector: Arc<dyn Connector>,
    slots: Vec<SlotEntry>,
    /// Requests waiting for an eligible slot; retries rejoin at the front.
    pending: VecDeque<RequestContext>,
    intake_rx: mpsc::Receiver<RequestContext>,
    control_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    results_rx: mpsc::Receiver<ResponseContext>,
    /// Kept so the results channel survives slot replacement.
    results_tx: mpsc::Sender<ResponseContext>,
    feedback_rx: mpsc::UnboundedReceiver<SlotFeedback>,
    /// Kept so the feedback channel survives slot replacement.
    feedback_tx: mpsc::UnboundedSender<SlotFeedback>,
    /// Backoff before the next warm-floor dial after a failure.
    warm_retry: Option<Pin<Box<Sleep>>>,
    warm_failures: u32,
}

impl Dispatcher {
    async fn run(mut self) {
        self.ensure_min_connections();

        loop {
            let can_intake = self.pending.is_empty() && self.has_accepting_slot();
            let wake = {
                let control_rx = &mut self.control_rx;
                let feedback_rx = &mut self.feedback_rx;
                let results_rx = &mut self.results_rx;
                let intake_rx = &mut self.intake_rx;
                let warm_retry = &mut self.warm_retry;
                tokio::select! {
                    biased;
                    maybe = control_rx.recv() => Wake::Control(maybe),
                    maybe = feedback_rx.recv() => match maybe {
                        Some(feedback) => Wake::Feedback(feedback),
                        // We hold a sender; the channel cannot close.
                        None => continue,
                    },
                    maybe = results_rx.recv() => match maybe {
                        Some(result) => Wake::Result(result),
                        None => continue,
                    },
                    maybe = intake_rx.recv(), if can_intake => Wake::Intake(maybe),
                    () = async {
                        match warm_retry.as_mut() {
                            Some(sleep) => sleep.as_mut().await,
                            None => std::future::pending().await,
                        }
                    } => Wake::WarmRetry,
                }
            };

            match wake {
                Wake::Control(ack) => {
                    self.shutdown(ack);
                    return;
                }
                Wake::Intake(None) => {
                    // The pool handle is gone; treat it as a shutdown.
                    self.shutdown(None);
                    return;
                }
                Wake::Intake(Some(request)) => {
                    self.pending.push_back(request);
                    self.route_pending();
                }
                Wake::Feedback(SlotFeedback::Status {
                    slot,
                    acked,
                    connected,
                    accepting,
                    established,
                    faulted,
                }) => {
                    self.apply_status(slot, acked, connected, accepting, established, faulted);
                    self.route_pending();
                    self.ensure_min_connections();
                }
                Wake::Feedback(SlotFeedback::Result(context)) | Wake::Result(context) => {
                    self.handle_result(context);
                    self.route_pending();
                }
                Wake::WarmRetry => {
                    self.warm_retry = None;
                    self.ensure_min_connections();
                }
            }
        }
    }

    fn has_accepting_slot(&self) -> bool {
        self.slots.iter().any(|slot| slot.accepting)
    }

    /// Pick a slot for the next request: an idle slot with an open
    /// connection first, then one whose warm dial is already in flight,
    /// and only then an unconnected one that must dial from scratch.
    fn pick_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.accepting && slot.established)
            .or_else(|| {
                self.slots
                    .iter()
                    .position(|slot| slot.accepting && slot.connected && !slot.established)
            })
            .or_else(|| {
                self.slots
                    .iter()
                    .position(|slot| slot.accepting && !slot.connected)
            })
    }

    fn route_pending(&mut self) {
        while !self.pending.is_empty() {
            let Some(index) = self.pick_slot() else { break };
            let Some(request) = self.pending.pop_front() else {
                break;
            };
            // Mark the slot taken until its own status confirms it.
            self.slots[index].accepting = false;
            if let Err(request) = self.send_command(index, SlotCommand::NewRequest(request)) {
                if let SlotCommand::NewRequest(request) = request {
                    self.pending.push_front(request);
                }
                self.replace_slot(index);
            }
        }
    }

    /// Send a sequenced command to a slot; on failure the command is
    /// handed back so the caller can recover its payload.
    fn send_command(&mut self, index: usize, command: SlotCommand) -> Result<(), SlotCommand> {
        let entry = &mut self.slots[index];
        let seq = entry.sent_seq + 1;
        entry.sent_seq = seq;
        entry
            .ports
            .input
            .send(SlotInput::Command { seq, command })
            .map_err(|SendError(input)| match input {
                SlotInput::Command { command, .. } => command,
                SlotInput::FromConnection { .. } => unreachable!("commands only"),
            })
    }

    fn apply_status(
        &mut self,
        slot: usize,
        acked: u64,
        connected: bool,
        accepting: bool,
        established: bool,
        faulted: bool,
    ) {
        if slot >= self.slots.len() {
            return;
        }
        if faulted {
            self.replace_slot(slot);
            return;
        }
        if acked != self.slots[slot].sent_seq {
            // Published before the slot saw our latest command; routing on
            // it could hand two requests to one slot.
            tracing::trace!(slot, acked, sent = self.slots[slot].sent_seq, "stale slot status");
            return;
        }

        let was_warming = self.slots[slot].warming;
        self.slots[slot].connected = connected;
        self.slots[slot].accepting = accepting;
        self.slots[slot].established = established;

        if was_warming {
            if established {
                self.slots[slot].warming = false;
                self.warm_failures = 0;
            } else if !connected {
                // The warm dial failed; hold off before re-dialing.
                self.slots[slot].warming = false;
                self.warm_failures = self.warm_failures.saturating_add(1);
                let delay = Duration::from_millis(100u64 << self.warm_failures.min(6));
                tracing::debug!(slot, failures = self.warm_failures, delay_ms = delay.as_millis() as u64,
                    "warm connection attempt failed; backing off");
                self.warm_retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
        } else if established {
            self.warm_failures = 0;
        }
    }

    /// Apply the retry policy to one slot result: settle the promise, or
    /// put a retryable failure back at the head of the queue with one less
    /// retry in its budget. Only failures from before a response was
    /// determined are eligible; anything later already reached the caller.
    fn handle_result(&mut self, context: ResponseContext) {
        let ResponseContext { request, result } = context;
        match result {
            Ok(response) => request.promise.settle(Ok(response)),
            Err(cause) => {
                if cause.is_pre_response() && request.can_be_retried() {
                    tracing::debug!(request = %request.info(), %cause,
                        retries_left = request.retries_left,
                        "re-enqueueing failed request");
                    self.pending.push_front(request.into_retry());
                } else {
                    request.promise.settle(Err(cause));
                }
            }
        }
    }

    /// Keep dialing warm connections until `min_connections` slots hold
    /// (or are establishing) one.
    fn ensure_min_connections(&mut self) {
        if self.settings.min_connections == 0 || self.warm_retry.is_some() {
            return;
        }
        let mut have = self
            .slots
            .iter()
            .filter(|slot| slot.connected || slot.warming)
            .count();
        if have >= self.settings.min_connections {
            return;
        }
        for index in 0..self.slots.len() {
            if have >= self.settings.min_connections {
                break;
            }
            {
                let entry = &self.slots[index];
                if entry.connected || entry.warming || !entry.accepting {
                    continue;
                }
            }
            if self.send_command(index, SlotCommand::PreConnect).is_err() {
                self.replace_slot(index);
                continue;
            }
            self.slots[index].warming = true;
            have += 1;
        }
    }

    /// Tear down a slot (after a fault or a dead task) and spawn a fresh
    /// runtime in its place.
    fn replace_slot(&mut self, index: usize) {
        tracing::warn!(slot = index, "replacing slot runtime");
        let fresh = SlotEntry {
            ports: spawn_slot(
                index,
                Arc::clone(&self.settings),
                Arc::clone(&self.connector),
                self.results_tx.clone(),
                self.feedback_tx.clone(),
            ),
            sent_seq: 0,
            connected: false,
            accepting: true,
            established: false,
            warming: false,
        };
        let old = std::mem::replace(&mut self.slots[index], fresh);
        old.ports.task.abort();
    }

    fn shutdown(&mut self, ack: Option<oneshot::Sender<()>>) {
        tracing::debug!(pending = self.pending.len(), "connection pool shutting down");
        for index in 0..self.slots.len() {
            let _ = self.send_command(index, SlotCommand::Shutdown);
        }
        for request in self.pending.drain(..) {
            request.promise.settle(Err(FailureCause::Shutdown));
        }
        self.intake_rx.close();
        while let Ok(request) = self.intake_rx.try_recv() {
            request.promise.settle(Err(FailureCause::Shutdown));
        }
        // Results that were dispatched before the shutdown still reach
        // their callers; failures are final now, no more retries.
        while let Ok(context) = self.results_rx.try_recv() {
            settle_now(context);
        }
        while let Ok(feedback) = self.feedback_rx.try_recv() {
            if let SlotFeedback::Result(context) = feedback {
                settle_now(context);
            }
        }
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

fn settle_now(context: ResponseContext) {
    let ResponseContext { request, result } = context;
    request.promise.settle(result);
}
