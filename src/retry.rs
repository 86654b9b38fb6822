//! Conflict-aware retry policy.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries); default 3.
//! - Only `Throttled` and `Transient` failures are retried. `Conflict`, `NotFound`,
//!   `InvalidRequest` and `Unauthorized` (including credential-resolver denials) return
//!   immediately and unmodified, whichever attempt they arise on.
//! - A throttle's retry-after hint replaces the computed backoff; otherwise backoff plus
//!   jitter decides the wait.
//! - When the budget runs out the caller gets `ClientError::RetryExhausted` carrying the
//!   original failures, the deciding one last.
//! - Attempt counters live in the call, never in the policy, so one policy can guard any
//!   number of concurrent operations.
//!
//! ```rust
//! use std::time::Duration;
//! use catwalk::{Backoff, ClientError, Failure, InstantSleeper, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::exponential(Duration::from_millis(200)))
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), ClientError> =
//!     policy.execute(|| async { Err(ClientError::from(Failure::conflict("exists"))) }).await;
//! assert!(result.unwrap_err().is_conflict());
//! # });
//! ```

use crate::error::{ClientError, Failure, MAX_RETRY_FAILURES};
use crate::executor::{OperationResult, Request, RequestExecutor, Response};
use crate::sleeper::{await_or_cancel, sleep_or_cancel};
use crate::transport::StreamingResponse;
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_layer::Layer;
use tower_service::Service;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(200);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Retry policy combining backoff, jitter and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: default_backoff(),
            jitter: Jitter::full(),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

fn default_backoff() -> Backoff {
    Backoff::exponential(DEFAULT_BACKOFF_BASE)
        .with_max(DEFAULT_BACKOFF_MAX)
        .unwrap_or_else(|_| Backoff::exponential(DEFAULT_BACKOFF_BASE))
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ClientError>
    where
        T: Send,
        Fut: Future<Output = Result<T, ClientError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.execute_with_cancel(None, operation).await
    }

    /// Like [`RetryPolicy::execute`], abandoning attempts and waits once `cancel` fires.
    pub async fn execute_with_cancel<T, Fut, Op>(
        &self,
        cancel: Option<&CancellationToken>,
        mut operation: Op,
    ) -> Result<T, ClientError>
    where
        T: Send,
        Fut: Future<Output = Result<T, ClientError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut failures: Vec<Failure> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let failure = match await_or_cancel(cancel, operation()).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(ClientError::Failure(f)) if f.kind.is_retryable() => f,
                Err(e) => return Err(e),
            };

            if attempt == self.max_attempts {
                tracing::warn!(
                    attempts = self.max_attempts,
                    kind = %failure.kind,
                    error = %failure,
                    "retry budget exhausted"
                );
                failures.push(failure);
                return Err(ClientError::retry_exhausted(self.max_attempts, failures));
            }

            let delay = match failure.retry_after {
                Some(hint) => self.backoff.delay_with_hint(attempt, Some(hint)),
                None => self.jitter.apply(self.backoff.delay(attempt)),
            };
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                kind = %failure.kind,
                delay_ms = delay.as_millis() as u64,
                "retrying failed request"
            );
            failures.push(failure);
            if failures.len() > MAX_RETRY_FAILURES {
                failures.remove(0);
            }

            sleep_or_cancel(self.sleeper.as_ref(), delay, cancel).await?;
        }

        Err(ClientError::retry_exhausted(self.max_attempts, failures))
    }

    /// Decorate `inner` so every call goes through this policy.
    pub fn wrap<E: RequestExecutor>(self, inner: E) -> Retrying<E> {
        Retrying { inner, policy: self }
    }

    /// Tower layer applying this policy to a `Service<Request>`.
    pub fn into_layer(self) -> RetryLayer {
        RetryLayer { policy: self }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

/// Errors produced while building a policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("max_polls must be > 0 when set")]
    ZeroMaxPolls,
    #[error("invalid backoff: {0}")]
    Backoff(#[from] crate::backoff::BackoffError),
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            backoff: defaults.backoff,
            jitter: defaults.jitter,
            sleeper: defaults.sleeper,
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Executor decorator produced by [`RetryPolicy::wrap`].
#[derive(Debug, Clone)]
pub struct Retrying<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E> Retrying<E> {
    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<E: RequestExecutor> RequestExecutor for Retrying<E> {
    async fn execute(&self, request: Request) -> OperationResult {
        let cancel = request.cancellation.clone();
        let inner = &self.inner;
        self.policy
            .execute_with_cancel(cancel.as_ref(), || inner.execute(request.clone()))
            .await
    }

    async fn open_stream(&self, request: Request) -> Result<StreamingResponse, ClientError> {
        let cancel = request.cancellation.clone();
        let inner = &self.inner;
        self.policy
            .execute_with_cancel(cancel.as_ref(), || inner.open_stream(request.clone()))
            .await
    }
}

/// Tower-native retry layer.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

/// Retry service produced by [`RetryLayer`].
#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService { inner, policy: self.policy.clone() }
    }
}

impl<S> Service<Request> for RetryService<S>
where
    S: Service<Request, Response = Response, Error = ClientError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = ClientError;
    type Future = BoxFuture<'static, Result<Response, ClientError>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let policy = self.policy.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let cancel = req.cancellation.clone();
            policy
                .execute_with_cancel(cancel.as_ref(), move || {
                    let mut svc = inner.clone();
                    let req = req.clone();
                    async move { svc.call(req).await }
                })
                .await
        })
    }
}

/// Adapts any [`RequestExecutor`] into a tower `Service<Request>`.
#[derive(Debug)]
pub struct ExecutorService<E> {
    executor: Arc<E>,
}

impl<E> Clone for ExecutorService<E> {
    fn clone(&self) -> Self {
        Self { executor: self.executor.clone() }
    }
}

impl<E> ExecutorService<E> {
    pub fn new(executor: E) -> Self {
        Self { executor: Arc::new(executor) }
    }
}

impl<E> Service<Request> for ExecutorService<E>
where
    E: RequestExecutor + 'static,
{
    type Response = Response;
    type Error = ClientError;
    type Future = BoxFuture<'static, OperationResult>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let executor = self.executor.clone();
        Box::pin(async move { executor.execute(req).await })
    }
}
