//! Slot State Machine
//!
//! The pure core of the pool: one value describing the phase of a slot and
//! one transition function. No I/O and no clocks live here — side effects
//! are requested through [`SlotContext`], timers are armed by the runtime
//! from [`SlotState::state_timeout`], and every asynchronous signal arrives
//! as a [`SlotEvent`].
//!
//! Shared behavior (the busy-failure policy, ignoring connection events
//! once a result has been determined) lives in small helpers invoked from
//! multiple match arms; there is deliberately no state trait hierarchy.
//!
//! An event that is not legal in the current state is a wiring bug and is
//! returned as a [`SlotFault`]; the runtime tears the slot down in
//! response. This is an assertion, not a recovery path.

use std::time::Duration;

use crate::error::{FailureCause, SlotFault};
use crate::events::SlotEvent;
use crate::message::{HttpRequest, ResponseHead};
use crate::request::{RequestContext, RequestInfo, ResponseResult};
use crate::settings::PoolSettings;

/// Effects and queries the state machine requests from its runtime.
///
/// The runtime passes itself as this context on every transition; the
/// machine holds no reference back to it, so there is no ownership cycle
/// between the two.
pub trait SlotContext {
    /// Begin establishing a connection. Only ever requested from
    /// `Unconnected`, so the slot never owns two connections.
    fn open_connection(&mut self);

    /// Hand the request to the open connection for writing. The runtime
    /// owns the connection; the machine only names the request.
    fn push_request(&mut self, request: &HttpRequest);

    /// Relinquish the request together with its determined result. The
    /// runtime routes it to the dispatcher, which settles or retries.
    fn dispatch_response(&mut self, request: RequestContext, result: ResponseResult);

    /// Whether the slot's connection is known to be closed or unusable.
    fn connection_closed(&self) -> bool;

    /// Whether HTTP connection semantics force a close after this response.
    fn will_close_after(&self, response: &ResponseHead) -> bool;

    /// The pool settings.
    fn settings(&self) -> &PoolSettings;
}

/// The phase of one pool slot.
///
/// Exactly one of these is held per slot; each variant carries precisely
/// the data needed to resume. States that have already relinquished their
/// [`RequestContext`] (the response was dispatched) keep only a
/// [`RequestInfo`] for log messages.
#[derive(Debug)]
pub enum SlotState {
    /// No socket, no request.
    Unconnected,

    /// Dialing a warm connection; no request yet.
    PreConnecting,

    /// Dialing in order to serve a specific request.
    Connecting {
        /// The request that triggered the dial.
        request: RequestContext,
    },

    /// Open connection, nothing in flight.
    Idle,

    /// Request head sent; awaiting the response head.
    WaitingForResponse {
        /// The in-flight request.
        request: RequestContext,
        /// True until the request entity finishes streaming out.
        req_entity_pending: bool,
    },

    /// The result (response or failure) is determined; waiting for the
    /// output port to accept it.
    WaitingForResponseDispatch {
        /// The in-flight request.
        request: RequestContext,
        /// The determined result, not yet delivered.
        result: ResponseResult,
        /// True until the request entity finishes streaming out.
        req_entity_pending: bool,
    },

    /// Response dispatched; the caller has not yet subscribed to its
    /// entity stream.
    WaitingForResponseEntitySubscription {
        /// Description of the dispatched request, for log messages.
        request: RequestInfo,
        /// Head of the dispatched response.
        response: ResponseHead,
        /// Subscription window; expiry force-closes the connection.
        timeout: Option<Duration>,
        /// True until the request entity finishes streaming out.
        req_entity_pending: bool,
    },

    /// The caller is consuming the response entity.
    WaitingForEndOfResponseEntity {
        /// Description of the dispatched request, for log messages.
        request: RequestInfo,
        /// Head of the dispatched response.
        response: ResponseHead,
        /// True until the request entity finishes streaming out.
        req_entity_pending: bool,
    },

    /// The response is fully done; the request entity is still streaming.
    WaitingForEndOfRequestEntity,
}

impl SlotState {
    /// Stable state name for log and fault messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::PreConnecting => "pre-connecting",
            Self::Connecting { .. } => "connecting",
            Self::Idle => "idle",
            Self::WaitingForResponse { .. } => "waiting-for-response",
            Self::WaitingForResponseDispatch { .. } => "waiting-for-response-dispatch",
            Self::WaitingForResponseEntitySubscription { .. } => {
                "waiting-for-response-entity-subscription"
            }
            Self::WaitingForEndOfResponseEntity { .. } => "waiting-for-end-of-response-entity",
            Self::WaitingForEndOfRequestEntity => "waiting-for-end-of-request-entity",
        }
    }

    /// Whether the slot holds, or is establishing, a connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Unconnected)
    }

    /// Whether the dispatcher may route a new request to this slot.
    #[must_use]
    pub fn is_accepting_requests(&self) -> bool {
        matches!(self, Self::Unconnected | Self::PreConnecting | Self::Idle)
    }

    /// The timeout the runtime should arm for this state, if any.
    #[must_use]
    pub fn state_timeout(&self) -> Option<Duration> {
        match self {
            Self::WaitingForResponseEntitySubscription { timeout, .. } => *timeout,
            _ => None,
        }
    }

    /// Apply one event, producing the next state.
    ///
    /// Effects are requested through `ctx` as the transition demands them.
    /// Unlisted (state, event) pairs are programming errors and come back
    /// as a [`SlotFault`].
    pub fn on_event(
        self,
        event: SlotEvent,
        ctx: &mut dyn SlotContext,
    ) -> Result<SlotState, SlotFault> {
        use SlotEvent as E;
        use SlotState as S;

        // Shutdown is accepted everywhere: busy states drop their request
        // with a warning, idle states fall through silently.
        if matches!(event, E::Shutdown) {
            return Ok(self.on_shutdown());
        }

        match (self, event) {
            // ============================================
            // Unconnected
            // ============================================
            (S::Unconnected, E::PreConnect) => {
                ctx.open_connection();
                Ok(S::PreConnecting)
            }
            (S::Unconnected, E::NewRequest(request)) => {
                ctx.open_connection();
                Ok(S::Connecting { request })
            }

            // ============================================
            // PreConnecting
            // ============================================
            (S::PreConnecting, E::ConnectionAttemptSucceeded) => Ok(S::Idle),
            // The dial is already in flight; the request latches on.
            (S::PreConnecting, E::NewRequest(request)) => Ok(S::Connecting { request }),
            (S::PreConnecting, E::ConnectionAttemptFailed(cause)) => {
                tracing::debug!(%cause, "warm connection attempt failed");
                Ok(S::Unconnected)
            }
            (S::PreConnecting, E::ConnectionFailed(_) | E::ConnectionCompleted) => {
                Ok(S::Unconnected)
            }

            // ============================================
            // Connecting (dialing for a request)
            // ============================================
            (S::Connecting { request }, E::ConnectionAttemptSucceeded) => {
                ctx.push_request(&request.request);
                Ok(S::WaitingForResponse {
                    request,
                    req_entity_pending: true,
                })
            }
            (S::Connecting { request }, E::ConnectionAttemptFailed(cause)) => {
                Ok(fail_ongoing_request(ctx, request, cause, false))
            }
            (S::Connecting { request }, E::ConnectionFailed(cause)) => {
                Ok(fail_ongoing_request(ctx, request, cause, false))
            }
            (S::Connecting { request }, E::ConnectionCompleted) => {
                Ok(fail_ongoing_request(ctx, request, unexpected_close(), false))
            }

            // ============================================
            // Idle
            // ============================================
            (S::Idle, E::NewRequest(request)) => {
                ctx.push_request(&request.request);
                Ok(S::WaitingForResponse {
                    request,
                    req_entity_pending: true,
                })
            }
            (S::Idle, E::ConnectionCompleted) => Ok(S::Unconnected),
            (S::Idle, E::ConnectionFailed(cause)) => {
                tracing::debug!(%cause, "idle connection failed");
                Ok(S::Unconnected)
            }

            // ============================================
            // WaitingForResponse
            // ============================================
            (
                S::WaitingForResponse {
                    request,
                    req_entity_pending: true,
                },
                E::RequestEntityCompleted,
            ) => Ok(S::WaitingForResponse {
                request,
                req_entity_pending: false,
            }),
            (
                S::WaitingForResponse {
                    request,
                    req_entity_pending,
                },
                E::ResponseReceived(response),
            ) => Ok(S::WaitingForResponseDispatch {
                request,
                result: Ok(response),
                req_entity_pending,
            }),
            (S::WaitingForResponse { request, .. }, E::RequestEntityFailed(cause)) => {
                // The entity stream is finished (by failing); nothing left
                // to wait for on the request side.
                Ok(fail_ongoing_request(ctx, request, cause, false))
            }
            (
                S::WaitingForResponse {
                    request,
                    req_entity_pending,
                },
                E::ConnectionFailed(cause),
            ) => Ok(fail_ongoing_request(ctx, request, cause, req_entity_pending)),
            (
                S::WaitingForResponse {
                    request,
                    req_entity_pending,
                },
                E::ConnectionCompleted,
            ) => Ok(fail_ongoing_request(
                ctx,
                request,
                unexpected_close(),
                req_entity_pending,
            )),
            (
                S::WaitingForResponse {
                    request,
                    req_entity_pending,
                },
                E::ConnectionAttemptFailed(cause),
            ) => Ok(fail_ongoing_request(ctx, request, cause, req_entity_pending)),

            // ============================================
            // WaitingForResponseDispatch
            // ============================================
            (
                S::WaitingForResponseDispatch {
                    request,
                    result,
                    req_entity_pending: true,
                },
                E::RequestEntityCompleted,
            ) => Ok(S::WaitingForResponseDispatch {
                request,
                result,
                req_entity_pending: false,
            }),
            (
                S::WaitingForResponseDispatch {
                    request, result, ..
                },
                E::RequestEntityFailed(cause),
            ) => {
                // The result is already determined; note the entity failure
                // and keep waiting for the port. The connection will not be
                // reused.
                tracing::debug!(request = %request.info(), %cause,
                    "request entity failed after the result was determined");
                Ok(S::WaitingForResponseDispatch {
                    request,
                    result,
                    req_entity_pending: false,
                })
            }
            (
                S::WaitingForResponseDispatch {
                    request,
                    result,
                    req_entity_pending,
                },
                E::ResponseDispatchable,
            ) => match result {
                Ok(response) => {
                    let info = request.info();
                    let head = response.head.clone();
                    let timeout = ctx.settings().response_entity_subscription_timeout();
                    ctx.dispatch_response(request, Ok(response));
                    Ok(S::WaitingForResponseEntitySubscription {
                        request: info,
                        response: head,
                        timeout,
                        req_entity_pending,
                    })
                }
                Err(cause) => {
                    ctx.dispatch_response(request, Err(cause));
                    Ok(S::Unconnected)
                }
            },

            // ============================================
            // WaitingForResponseEntitySubscription
            // ============================================
            (
                S::WaitingForResponseEntitySubscription {
                    request,
                    response,
                    timeout,
                    req_entity_pending: true,
                },
                E::RequestEntityCompleted,
            ) => Ok(S::WaitingForResponseEntitySubscription {
                request,
                response,
                timeout,
                req_entity_pending: false,
            }),
            (
                S::WaitingForResponseEntitySubscription {
                    request,
                    response,
                    timeout,
                    ..
                },
                E::RequestEntityFailed(cause),
            ) => {
                tracing::debug!(%request, %cause,
                    "request entity failed after the response was dispatched");
                Ok(S::WaitingForResponseEntitySubscription {
                    request,
                    response,
                    timeout,
                    req_entity_pending: false,
                })
            }
            (
                S::WaitingForResponseEntitySubscription {
                    request,
                    response,
                    req_entity_pending,
                    ..
                },
                E::ResponseEntitySubscribed,
            ) => Ok(S::WaitingForEndOfResponseEntity {
                request,
                response,
                req_entity_pending,
            }),
            (
                S::WaitingForResponseEntitySubscription {
                    request,
                    response,
                    timeout,
                    ..
                },
                E::Timeout,
            ) => {
                tracing::warn!(%request, status = %response.status, timeout = ?timeout,
                    "response entity was not subscribed in time; dropping the connection");
                Ok(S::Unconnected)
            }

            // ============================================
            // WaitingForEndOfResponseEntity
            // ============================================
            (
                S::WaitingForEndOfResponseEntity {
                    request,
                    response,
                    req_entity_pending: true,
                },
                E::RequestEntityCompleted,
            ) => Ok(S::WaitingForEndOfResponseEntity {
                request,
                response,
                req_entity_pending: false,
            }),
            (
                S::WaitingForEndOfResponseEntity {
                    request, response, ..
                },
                E::RequestEntityFailed(cause),
            ) => {
                tracing::debug!(%request, %cause,
                    "request entity failed after the response was dispatched");
                Ok(S::WaitingForEndOfResponseEntity {
                    request,
                    response,
                    req_entity_pending: false,
                })
            }
            (
                S::WaitingForEndOfResponseEntity {
                    request,
                    response,
                    req_entity_pending,
                },
                E::ResponseEntityCompleted,
            ) => {
                if req_entity_pending {
                    Ok(S::WaitingForEndOfRequestEntity)
                } else if ctx.will_close_after(&response) || ctx.connection_closed() {
                    tracing::debug!(%request, "response complete; connection will not be reused");
                    Ok(S::Unconnected)
                } else {
                    Ok(S::Idle)
                }
            }
            (S::WaitingForEndOfResponseEntity { request, .. }, E::ResponseEntityFailed(cause)) => {
                tracing::debug!(%request, %cause, "response entity failed; dropping the connection");
                Ok(S::Unconnected)
            }

            // Connection-class events once the result is determined carry
            // no new information for this request; the closed-connection
            // flag is consulted when the entity streams finish.
            (
                state @ (S::WaitingForResponseDispatch { .. }
                | S::WaitingForResponseEntitySubscription { .. }
                | S::WaitingForEndOfResponseEntity { .. }),
                E::ConnectionCompleted | E::ConnectionFailed(_),
            ) => {
                tracing::debug!(state = state.name(), "ignoring connection event; result already determined");
                Ok(state)
            }

            // ============================================
            // WaitingForEndOfRequestEntity
            // ============================================
            (
                S::WaitingForEndOfRequestEntity,
                E::RequestEntityCompleted | E::RequestEntityFailed(_),
            ) => {
                if ctx.connection_closed() {
                    Ok(S::Unconnected)
                } else {
                    Ok(S::Idle)
                }
            }
            (
                S::WaitingForEndOfRequestEntity,
                E::ConnectionCompleted | E::ConnectionFailed(_),
            ) => Ok(S::Unconnected),

            // ============================================
            // Anything else is a wiring bug.
            // ============================================
            (state, event) => Err(SlotFault {
                state: state.name(),
                event: event.name(),
            }),
        }
    }

    fn on_shutdown(self) -> SlotState {
        match self {
            Self::Connecting { request }
            | Self::WaitingForResponse { request, .. }
            | Self::WaitingForResponseDispatch { request, .. } => {
                tracing::warn!(request = %request.info(),
                    "dropping in-flight request; the pool is shutting down");
                SlotState::Unconnected
            }
            Self::WaitingForResponseEntitySubscription { request, .. }
            | Self::WaitingForEndOfResponseEntity { request, .. } => {
                tracing::warn!(%request,
                    "abandoning dispatched response; the pool is shutting down");
                SlotState::Unconnected
            }
            _ => SlotState::Unconnected,
        }
    }
}

/// The busy-failure policy, shared by the states that still hold an
/// undispatched request. A retryable request is returned to the dispatcher
/// through the normal dispatch path with the failure attached; everything
/// else is queued for delivery to the caller via the output port.
fn fail_ongoing_request(
    ctx: &mut dyn SlotContext,
    request: RequestContext,
    cause: FailureCause,
    entity_pending: bool,
) -> SlotState {
    if request.can_be_retried() {
        tracing::debug!(request = %request.info(), %cause,
            retries_left = request.retries_left,
            "request attempt failed; returning it to the dispatcher for retry");
        ctx.dispatch_response(request, Err(cause));
        if entity_pending {
            SlotState::WaitingForEndOfRequestEntity
        } else {
            SlotState::Unconnected
        }
    } else {
        tracing::debug!(request = %request.info(), %cause,
            "request attempt failed; reporting the failure to the caller");
        SlotState::WaitingForResponseDispatch {
            request,
            result: Err(cause),
            req_entity_pending: entity_pending,
        }
    }
}

fn unexpected_close() -> FailureCause {
    FailureCause::Protocol("connection closed unexpectedly".to_string())
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, Uri, Version};

    use super::*;
    use crate::message::{HttpResponse, ResponseEntity};
    use crate::request::ResponseContext;

    /// Records the effects the machine requests; queries are plain flags.
    struct RecordingContext {
        settings: PoolSettings,
        closed: bool,
        close_after: bool,
        opened: usize,
        pushed: Vec<Uri>,
        dispatched: Vec<ResponseContext>,
    }

    impl RecordingContext {
        fn new() -> Self {
            Self {
                settings: PoolSettings::default(),
                closed: false,
                close_after: false,
                opened: 0,
                pushed: Vec::new(),
                dispatched: Vec::new(),
            }
        }
    }

    impl SlotContext for RecordingContext {
        fn open_connection(&mut self) {
            self.opened += 1;
        }

        fn push_request(&mut self, request: &HttpRequest) {
            self.pushed.push(request.uri.clone());
        }

        fn dispatch_response(&mut self, request: RequestContext, result: ResponseResult) {
            self.dispatched.push(ResponseContext { request, result });
        }

        fn connection_closed(&self) -> bool {
            self.closed
        }

        fn will_close_after(&self, _response: &ResponseHead) -> bool {
            self.close_after
        }

        fn settings(&self) -> &PoolSettings {
            &self.settings
        }
    }

    fn request_with(
        method: Method,
        retries: usize,
    ) -> (RequestContext, crate::request::ResponseHandle) {
        RequestContext::new(
            HttpRequest::new(method, Uri::from_static("http://example.com/data")),
            retries,
        )
    }

    fn detached_entity() -> ResponseEntity {
        let (_feed, chunks) = tokio::sync::mpsc::channel(1);
        let (subscribed, _watch) = tokio::sync::watch::channel(false);
        ResponseEntity::new(chunks, subscribed)
    }

    fn response_ok() -> HttpResponse {
        HttpResponse {
            head: ResponseHead::new(StatusCode::OK),
            entity: detached_entity(),
        }
    }

    fn step(state: SlotState, event: SlotEvent, ctx: &mut RecordingContext) -> SlotState {
        state.on_event(event, ctx).expect("legal transition")
    }

    #[test]
    fn happy_path_reuses_the_connection() {
        let mut ctx = RecordingContext::new();
        let (request, _handle) = request_with(Method::GET, 0);

        let state = step(SlotState::Unconnected, SlotEvent::NewRequest(request), &mut ctx);
        assert_eq!(state.name(), "connecting");
        assert_eq!(ctx.opened, 1);

        let state = step(state, SlotEvent::ConnectionAttemptSucceeded, &mut ctx);
        assert_eq!(state.name(), "waiting-for-response");
        assert_eq!(ctx.pushed.len(), 1);

        let state = step(state, SlotEvent::RequestEntityCompleted, &mut ctx);
        assert!(matches!(
            state,
            SlotState::WaitingForResponse {
                req_entity_pending: false,
                ..
            }
        ));

        let state = step(state, SlotEvent::ResponseReceived(response_ok()), &mut ctx);
        assert_eq!(state.name(), "waiting-for-response-dispatch");
        assert!(ctx.dispatched.is_empty());

        let state = step(state, SlotEvent::ResponseDispatchable, &mut ctx);
        assert_eq!(state.name(), "waiting-for-response-entity-subscription");
        assert_eq!(ctx.dispatched.len(), 1);
        assert!(ctx.dispatched[0].result.is_ok());
        assert_eq!(
            state.state_timeout(),
            ctx.settings.response_entity_subscription_timeout()
        );

        let state = step(state, SlotEvent::ResponseEntitySubscribed, &mut ctx);
        assert_eq!(state.name(), "waiting-for-end-of-response-entity");

        let state = step(state, SlotEvent::ResponseEntityCompleted, &mut ctx);
        assert_eq!(state.name(), "idle");

        // The whole exchange used exactly one connection and one dispatch.
        assert_eq!(ctx.opened, 1);
        assert_eq!(ctx.dispatched.len(), 1);
    }

    #[test]
    fn dial_failure_returns_retryable_request_to_dispatcher() {
        let mut ctx = RecordingContext::new();
        let (request, _handle) = request_with(Method::GET, 2);

        let state = step(SlotState::Unconnected, SlotEvent::NewRequest(request), &mut ctx);
        let state = step(
            state,
            SlotEvent::ConnectionAttemptFailed(FailureCause::Dial("refused".to_string())),
            &mut ctx,
        );

        assert_eq!(state.name(), "unconnected");
        assert_eq!(ctx.dispatched.len(), 1);
        assert_eq!(
            ctx.dispatched[0].result,
            Err(FailureCause::Dial("refused".to_string()))
        );
        // The request still holds its full budget; the dispatcher decrements.
        assert_eq!(ctx.dispatched[0].request.retries_left, 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_flows_through_the_dispatch_path() {
        let mut ctx = RecordingContext::new();
        let (request, handle) = request_with(Method::POST, 2);

        let state = SlotState::WaitingForResponse {
            request,
            req_entity_pending: true,
        };
        let cause = FailureCause::Protocol("mid-air collision".to_string());
        let state = step(state, SlotEvent::ConnectionFailed(cause.clone()), &mut ctx);
        assert_eq!(state.name(), "waiting-for-response-dispatch");
        assert!(ctx.dispatched.is_empty());

        let state = step(state, SlotEvent::RequestEntityCompleted, &mut ctx);
        assert!(matches!(
            state,
            SlotState::WaitingForResponseDispatch {
                req_entity_pending: false,
                ..
            }
        ));

        let state = step(state, SlotEvent::ResponseDispatchable, &mut ctx);
        assert_eq!(state.name(), "unconnected");
        assert_eq!(ctx.dispatched.len(), 1);

        // Settle the promise the way the dispatcher would and observe the
        // failure on the caller side, exactly once.
        let ResponseContext { request, result } = ctx.dispatched.pop().unwrap();
        request.promise.settle(result);
        assert_eq!(handle.await.unwrap_err(), cause);
    }

    #[test]
    fn subscription_timeout_drops_the_connection() {
        let mut ctx = RecordingContext::new();
        let (request, _handle) = request_with(Method::GET, 0);

        let state = SlotState::Unconnected;
        let state = step(state, SlotEvent::NewRequest(request), &mut ctx);
        let state = step(state, SlotEvent::ConnectionAttemptSucceeded, &mut ctx);
        let state = step(state, SlotEvent::RequestEntityCompleted, &mut ctx);
        let state = step(state, SlotEvent::ResponseReceived(response_ok()), &mut ctx);
        let state = step(state, SlotEvent::ResponseDispatchable, &mut ctx);
        assert!(state.state_timeout().is_some());

        let state = step(state, SlotEvent::Timeout, &mut ctx);
        assert_eq!(state.name(), "unconnected");
        // The response was already dispatched; nothing further goes out.
        assert_eq!(ctx.dispatched.len(), 1);
    }

    #[test]
    fn preconnect_then_late_request_latches_onto_the_dial() {
        let mut ctx = RecordingContext::new();
        let (request, _handle) = request_with(Method::GET, 0);

        let state = step(SlotState::Unconnected, SlotEvent::PreConnect, &mut ctx);
        assert_eq!(state.name(), "pre-connecting");
        assert!(state.is_connected());
        assert!(state.is_accepting_requests());

        let state = step(state, SlotEvent::NewRequest(request), &mut ctx);
        assert_eq!(state.name(), "connecting");
        // The dial from PreConnect is reused; no second open.
        assert_eq!(ctx.opened, 1);

        let state = step(state, SlotEvent::ConnectionAttemptSucceeded, &mut ctx);
        assert_eq!(state.name(), "waiting-for-response");
        assert_eq!(ctx.pushed.len(), 1);
    }

    #[test]
    fn close_directive_prevents_reuse() {
        let mut ctx = RecordingContext::new();
        ctx.close_after = true;
        let (request, _handle) = request_with(Method::GET, 0);

        let state = SlotState::WaitingForEndOfResponseEntity {
            request: request.info(),
            response: ResponseHead::new(StatusCode::OK).with_version(Version::HTTP_10),
            req_entity_pending: false,
        };
        let state = step(state, SlotEvent::ResponseEntityCompleted, &mut ctx);
        assert_eq!(state.name(), "unconnected");
    }

    #[test]
    fn response_may_arrive_before_the_request_entity_finishes() {
        let mut ctx = RecordingContext::new();
        let (request, _handle) = request_with(Method::GET, 0);

        let state = SlotState::WaitingForResponse {
            request,
            req_entity_pending: true,
        };
        let state = step(state, SlotEvent::ResponseReceived(response_ok()), &mut ctx);
        let state = step(state, SlotEvent::ResponseDispatchable, &mut ctx);
        let state = step(state, SlotEvent::ResponseEntitySubscribed, &mut ctx);
        let state = step(state, SlotEvent::ResponseEntityCompleted, &mut ctx);
        // Request entity still pending: wait for it before going idle.
        assert_eq!(state.name(), "waiting-for-end-of-request-entity");

        let state = step(state, SlotEvent::RequestEntityCompleted, &mut ctx);
        assert_eq!(state.name(), "idle");
    }

    #[test]
    fn request_entity_end_on_closed_connection_goes_unconnected() {
        let mut ctx = RecordingContext::new();
        ctx.closed = true;

        let state = step(
            SlotState::WaitingForEndOfRequestEntity,
            SlotEvent::RequestEntityCompleted,
            &mut ctx,
        );
        assert_eq!(state.name(), "unconnected");
    }

    #[test]
    fn retryable_failure_with_pending_entity_waits_for_it() {
        let mut ctx = RecordingContext::new();
        let (request, _handle) = request_with(Method::GET, 1);

        let state = SlotState::WaitingForResponse {
            request,
            req_entity_pending: true,
        };
        let state = step(
            state,
            SlotEvent::ConnectionFailed(FailureCause::Protocol("reset".to_string())),
            &mut ctx,
        );
        assert_eq!(state.name(), "waiting-for-end-of-request-entity");
        assert_eq!(ctx.dispatched.len(), 1);
    }

    #[test]
    fn connection_events_after_dispatch_are_ignored() {
        let mut ctx = RecordingContext::new();
        let (request, _handle) = request_with(Method::GET, 0);

        let state = SlotState::WaitingForEndOfResponseEntity {
            request: request.info(),
            response: ResponseHead::new(StatusCode::OK),
            req_entity_pending: false,
        };
        let state = step(state, SlotEvent::ConnectionCompleted, &mut ctx);
        assert_eq!(state.name(), "waiting-for-end-of-response-entity");

        let state = step(
            state,
            SlotEvent::ConnectionFailed(FailureCause::Protocol("reset".to_string())),
            &mut ctx,
        );
        assert_eq!(state.name(), "waiting-for-end-of-response-entity");
        assert!(ctx.dispatched.is_empty());
    }

    #[test]
    fn illegal_event_is_a_fault() {
        let mut ctx = RecordingContext::new();
        let fault = SlotState::Idle
            .on_event(SlotEvent::ResponseReceived(response_ok()), &mut ctx)
            .unwrap_err();
        assert_eq!(
            fault,
            SlotFault {
                state: "idle",
                event: "response-received",
            }
        );

        let fault = SlotState::Unconnected
            .on_event(SlotEvent::ResponseEntityCompleted, &mut ctx)
            .unwrap_err();
        assert_eq!(fault.state, "unconnected");
    }

    #[test]
    fn duplicate_request_entity_completion_is_a_fault() {
        let mut ctx = RecordingContext::new();
        let (request, _handle) = request_with(Method::GET, 0);

        let state = SlotState::WaitingForResponse {
            request,
            req_entity_pending: false,
        };
        let fault = state
            .on_event(SlotEvent::RequestEntityCompleted, &mut ctx)
            .unwrap_err();
        assert_eq!(fault.event, "request-entity-completed");
    }

    #[tokio::test]
    async fn shutdown_drops_busy_requests() {
        let mut ctx = RecordingContext::new();
        let (request, handle) = request_with(Method::GET, 2);

        let state = SlotState::WaitingForResponse {
            request,
            req_entity_pending: true,
        };
        let state = step(state, SlotEvent::Shutdown, &mut ctx);
        assert_eq!(state.name(), "unconnected");
        assert!(ctx.dispatched.is_empty());

        // The dropped promise reads as a shutdown failure for the caller.
        assert_eq!(handle.await.unwrap_err(), FailureCause::Shutdown);
    }

    #[test]
    fn shutdown_in_idle_states_is_a_no_op() {
        let mut ctx = RecordingContext::new();
        assert_eq!(
            step(SlotState::Idle, SlotEvent::Shutdown, &mut ctx).name(),
            "unconnected"
        );
        assert_eq!(
            step(SlotState::Unconnected, SlotEvent::Shutdown, &mut ctx).name(),
            "unconnected"
        );
        assert_eq!(ctx.opened, 0);
        assert!(ctx.dispatched.is_empty());
    }

    #[test]
    fn accepting_and_connected_track_the_state_table() {
        let (request, _handle) = request_with(Method::GET, 0);
        let busy = SlotState::Connecting { request };

        assert!(!SlotState::Unconnected.is_connected());
        assert!(SlotState::Unconnected.is_accepting_requests());
        assert!(SlotState::PreConnecting.is_connected());
        assert!(SlotState::PreConnecting.is_accepting_requests());
        assert!(SlotState::Idle.is_connected());
        assert!(SlotState::Idle.is_accepting_requests());
        assert!(busy.is_connected());
        assert!(!busy.is_accepting_requests());
    }
}
