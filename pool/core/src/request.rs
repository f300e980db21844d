//! Request Lifecycle Types
//!
//! A request enters the pool wrapped in a [`RequestContext`]: the message
//! itself, a one-shot completion promise the caller awaits, and a retry
//! budget. The context is owned by exactly one place at a time — the
//! dispatcher queue or a single slot — and is relinquished either by
//! settling the promise or by being returned to the dispatcher for retry.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{Method, Uri};
use tokio::sync::oneshot;

use crate::error::FailureCause;
use crate::message::{HttpRequest, HttpResponse};

/// The outcome of one request attempt: a response, or the failure cause.
pub type ResponseResult = Result<HttpResponse, FailureCause>;

/// Caller-side completion handle: settles exactly once with the promise,
/// or with [`FailureCause::Shutdown`] if the pool abandoned the request.
pub struct ResponseHandle {
    receiver: oneshot::Receiver<ResponseResult>,
}

impl Future for ResponseHandle {
    type Output = ResponseResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|settled| match settled {
            Ok(result) => result,
            Err(_) => Err(FailureCause::Shutdown),
        })
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle").finish_non_exhaustive()
    }
}

/// Pool-side completion handle. Settling consumes the promise, so the
/// "settled exactly once" invariant holds by construction; dropping it
/// unsettled is observed by the [`ResponseHandle`] as a shutdown failure.
pub struct ResponsePromise {
    sender: oneshot::Sender<ResponseResult>,
}

impl ResponsePromise {
    /// Create a linked promise/handle pair.
    #[must_use]
    pub fn new() -> (Self, ResponseHandle) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, ResponseHandle { receiver })
    }

    /// Settle the request with its final result.
    pub fn settle(self, result: ResponseResult) {
        // The caller may have given up waiting; that is their business.
        let _ = self.sender.send(result);
    }
}

impl fmt::Debug for ResponsePromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsePromise").finish_non_exhaustive()
    }
}

/// A request travelling through the pool.
#[derive(Debug)]
pub struct RequestContext {
    /// The request to send.
    pub request: HttpRequest,
    /// Completion handle for the caller.
    pub promise: ResponsePromise,
    /// Remaining retry budget.
    pub retries_left: usize,
}

impl RequestContext {
    /// Wrap a request, returning the context and the caller's handle.
    #[must_use]
    pub fn new(request: HttpRequest, retries_left: usize) -> (Self, ResponseHandle) {
        let (promise, handle) = ResponsePromise::new();
        (
            Self {
                request,
                promise,
                retries_left,
            },
            handle,
        )
    }

    /// Whether a failed attempt may be re-sent: budget remaining, an
    /// idempotent method, and an entity that can be replayed from the start.
    #[must_use]
    pub fn can_be_retried(&self) -> bool {
        self.retries_left > 0 && self.request.is_idempotent() && self.request.entity.is_replayable()
    }

    /// Consume one unit of the retry budget for the next attempt.
    #[must_use]
    pub(crate) fn into_retry(self) -> Self {
        Self {
            retries_left: self.retries_left.saturating_sub(1),
            ..self
        }
    }

    /// A cheap description of the request for log messages.
    #[must_use]
    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            method: self.request.method.clone(),
            uri: self.request.uri.clone(),
        }
    }
}

/// Method and target of a request, kept by slot states that have already
/// relinquished the full [`RequestContext`].
#[derive(Clone, Debug)]
pub struct RequestInfo {
    /// Request method.
    pub method: Method,
    /// Request target.
    pub uri: Uri,
}

impl fmt::Display for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

/// One slot output record: the request context together with the outcome
/// of its attempt. The dispatcher either settles the promise or, for a
/// retryable failure, re-enqueues the request.
#[derive(Debug)]
pub struct ResponseContext {
    /// The request the result belongs to.
    pub request: RequestContext,
    /// Outcome of this attempt.
    pub result: ResponseResult,
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Uri;

    use super::*;
    use crate::message::RequestEntity;

    fn get_request() -> HttpRequest {
        HttpRequest::get(Uri::from_static("http://example.com/data"))
    }

    #[test]
    fn retry_predicate_requires_budget_method_and_entity() {
        let (retryable, _handle) = RequestContext::new(get_request(), 2);
        assert!(retryable.can_be_retried());

        let (no_budget, _handle) = RequestContext::new(get_request(), 0);
        assert!(!no_budget.can_be_retried());

        let post = HttpRequest::new(Method::POST, Uri::from_static("http://example.com/"));
        let (non_idempotent, _handle) = RequestContext::new(post, 2);
        assert!(!non_idempotent.can_be_retried());

        let streamed = get_request().with_entity(RequestEntity::Streamed {
            length: None,
            replayable: false,
        });
        let (one_shot_entity, _handle) = RequestContext::new(streamed, 2);
        assert!(!one_shot_entity.can_be_retried());
    }

    #[test]
    fn retry_consumes_budget() {
        let (context, _handle) = RequestContext::new(get_request(), 1);
        let retried = context.into_retry();
        assert_eq!(retried.retries_left, 0);
        assert!(!retried.can_be_retried());
    }

    #[tokio::test]
    async fn dropped_promise_reads_as_shutdown() {
        let (context, handle) = RequestContext::new(get_request(), 0);
        drop(context);
        assert_eq!(handle.await.unwrap_err(), FailureCause::Shutdown);
    }

    #[tokio::test]
    async fn settled_promise_delivers_the_result() {
        let (context, handle) = RequestContext::new(get_request(), 0);
        context
            .promise
            .settle(Err(FailureCause::Dial("refused".to_string())));
        assert_eq!(
            handle.await.unwrap_err(),
            FailureCause::Dial("refused".to_string())
        );
    }

    #[test]
    fn handle_stays_pending_until_settled() {
        let (context, handle) = RequestContext::new(get_request(), 0);
        let mut handle = tokio_test::task::spawn(handle);

        tokio_test::assert_pending!(handle.poll());

        context.promise.settle(Err(FailureCause::Shutdown));
        assert!(handle.is_woken());
        let settled = tokio_test::assert_ready!(handle.poll());
        assert_eq!(settled.unwrap_err(), FailureCause::Shutdown);
    }

    #[test]
    fn request_info_displays_method_and_target() {
        let strict = get_request().with_entity(RequestEntity::Strict(Bytes::from_static(b"x")));
        let (context, _handle) = RequestContext::new(strict, 0);
        assert_eq!(context.info().to_string(), "GET http://example.com/data");
    }
}
