//! Retry wrapper.
//!
//! Semantics:
//! - `max_retries` counts re-sends, so a request is attempted at most `max_retries + 1` times.
//! - `POST` requests are never re-sent.
//! - Only transport failures and 500/502/503/504 responses are retried; anything else
//!   returns immediately.
//! - Re-sends are immediate; the last error is returned when attempts run out.

use super::{ConnectionWrapper, WrapperKind};
use crate::connection::{ApiRequest, ApiResponse, Connection};
use crate::error::ConnectionError;
use futures::future::BoxFuture;
use reqwest::Method;
use std::any::Any;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

/// Tower-native retry layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryLayer {
    max_retries: usize,
}

impl RetryLayer {
    /// Retry transient failures up to `max_retries` times.
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }

    /// Configured number of re-sends.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }
}

/// Whether a failed request must not be re-sent.
pub fn skip_retry(method: &Method, err: &ConnectionError) -> bool {
    *method == Method::POST || !(err.is_transport() || err.is_retryable_status())
}

/// Retry service produced by [`RetryLayer`].
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    max_retries: usize,
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService { inner, max_retries: self.max_retries }
    }
}

impl<S> Service<ApiRequest> for RetryService<S>
where
    S: Service<ApiRequest, Response = ApiResponse, Error = ConnectionError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = ApiResponse;
    type Error = ConnectionError;
    type Future = BoxFuture<'static, Result<ApiResponse, ConnectionError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ConnectionError>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let max_retries = self.max_retries;
        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match inner.ready().await?.call(req.clone()).await {
                    Ok(resp) => return Ok(resp),
                    Err(err) => {
                        if attempt >= max_retries || skip_retry(&req.method, &err) {
                            return Err(err);
                        }
                        attempt += 1;
                        debug!(url = %req.url, attempt, error = %err, "retrying request");
                    }
                }
            }
        })
    }
}

impl ConnectionWrapper for RetryLayer {
    fn kind(&self) -> WrapperKind {
        WrapperKind::Retry
    }

    fn wrap(&self, inner: Connection) -> Connection {
        Connection::new(self.layer(inner))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::parse_url;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn failing(status: u16, succeed_on: usize) -> (Connection, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = counter.clone();
        let conn = Connection::new(tower::service_fn(move |_req: ApiRequest| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= succeed_on {
                    Ok(ApiResponse { status: 200, ..Default::default() })
                } else {
                    Err(ConnectionError::Status { status, body: format!("attempt {n}") })
                }
            }
        }));
        (conn, counter)
    }

    fn get() -> ApiRequest {
        ApiRequest::get(parse_url("https://api.example.com/v3/apps").unwrap())
    }

    #[tokio::test]
    async fn retries_transient_statuses_then_succeeds() {
        let (base, counter) = failing(502, 3);
        let conn = RetryLayer::new(2).wrap(base);
        let resp = conn.oneshot(get()).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_and_returns_last_error() {
        let (base, counter) = failing(503, usize::MAX);
        let conn = RetryLayer::new(2).wrap(base);
        let err = conn.oneshot(get()).await.unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 3, "initial attempt + 2 retries");
        assert_eq!(err, ConnectionError::Status { status: 503, body: "attempt 3".into() });
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (base, counter) = failing(404, usize::MAX);
        let conn = RetryLayer::new(5).wrap(base);
        let err = conn.oneshot(get()).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn post_is_never_retried() {
        let (base, counter) = failing(500, usize::MAX);
        let conn = RetryLayer::new(5).wrap(base);
        let req = ApiRequest::post_form(parse_url("https://api.example.com/v3/apps").unwrap(), &[]);
        conn.oneshot(req).await.unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_failures_are_retried() {
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = counter.clone();
        let base = Connection::new(tower::service_fn(move |req: ApiRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err::<ApiResponse, _>(ConnectionError::Transport {
                    url: req.url.to_string(),
                    message: "connection reset".into(),
                })
            }
        }));
        let conn = RetryLayer::new(1).wrap(base);
        assert!(conn.oneshot(get()).await.unwrap_err().is_transport());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_retries_is_a_single_attempt() {
        assert_eq!(RetryLayer::new(0).max_retries(), 0);
        assert!(skip_retry(&Method::POST, &ConnectionError::Status { status: 500, body: String::new() }));
        assert!(!skip_retry(&Method::GET, &ConnectionError::Status { status: 500, body: String::new() }));
    }
}
