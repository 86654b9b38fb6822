//! Polling-based tracking of long-running runs.
//!
//! [`RunPoller`] re-reads a run at a fixed interval while the service is still working on it
//! (`queued`, `in_progress`, `cancelling`) and hands the snapshot back as soon as the run
//! settles or needs the caller (`requires_action`). It never cancels a run on its own.
//!
//! Transient read failures are the executor's business: wrap it with a
//! [`RetryPolicy`](crate::RetryPolicy) and the poller only sees what survives. Any failure
//! that reaches the poller ends polling.
//!
//! ```rust,no_run
//! use catwalk::{HttpExecutor, RetryPolicy, Run, RunPoller, RunState, ResourceRef};
//! use catwalk::testing::InMemoryStore;
//!
//! # async fn demo() -> Result<(), catwalk::ClientError> {
//! let executor = RetryPolicy::default().wrap(HttpExecutor::new(InMemoryStore::new()));
//! let run_ref = ResourceRef::run("thread_1", "run_1")?;
//! let initial = Run::new("thread_1", "run_1", RunState::Queued);
//! let settled = RunPoller::new().poll(&executor, &run_ref, initial).await?;
//! println!("run settled as {}", settled.status);
//! # Ok(())
//! # }
//! ```

use crate::error::{ClientError, ProtocolError};
use crate::executor::{Request, RequestExecutor};
use crate::resource::ResourceRef;
use crate::retry::BuildError;
use crate::run::{fetch_run, Run};
use crate::sleeper::{sleep_or_cancel, Sleeper, TokioSleeper};
use crate::AuthContext;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Fixed-interval run poller. Cheap to clone and safe to share; poll counters live in
/// each call.
#[derive(Clone)]
pub struct RunPoller {
    interval: Duration,
    max_polls: Option<usize>,
    sleeper: Arc<dyn Sleeper>,
    auth: AuthContext,
}

impl std::fmt::Debug for RunPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPoller")
            .field("interval", &self.interval)
            .field("max_polls", &self.max_polls)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for RunPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
            sleeper: Arc::new(TokioSleeper),
            auth: AuthContext::new(),
        }
    }
}

impl RunPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RunPollerBuilder {
        RunPollerBuilder::default()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_polls(&self) -> Option<usize> {
        self.max_polls
    }

    /// Credential context attached to every read.
    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    /// Poll until the run leaves the in-flight states.
    pub async fn poll(
        &self,
        executor: &dyn RequestExecutor,
        run_ref: &ResourceRef,
        initial: Run,
    ) -> Result<Run, ClientError> {
        self.poll_with_cancel(executor, run_ref, initial, None).await
    }

    /// Like [`RunPoller::poll`], returning [`ClientError::Cancelled`] once `cancel` fires.
    pub async fn poll_with_cancel(
        &self,
        executor: &dyn RequestExecutor,
        run_ref: &ResourceRef,
        initial: Run,
        cancel: Option<&CancellationToken>,
    ) -> Result<Run, ClientError> {
        let mut current = initial;
        let mut polls = 0;
        while current.status.is_in_flight() {
            current = self.step(executor, run_ref, &current, polls, cancel).await?;
            polls += 1;
        }
        tracing::info!(run = %run_ref, status = %current.status, polls, "run settled");
        Ok(current)
    }

    /// Every freshly read snapshot, in order. The stream ends after the first snapshot
    /// that is no longer in flight, or after the first error. An initial run that has
    /// already settled yields nothing.
    pub fn watch(
        &self,
        executor: Arc<dyn RequestExecutor>,
        run_ref: ResourceRef,
        initial: Run,
        cancel: Option<CancellationToken>,
    ) -> BoxStream<'static, Result<Run, ClientError>> {
        struct Watch {
            poller: RunPoller,
            executor: Arc<dyn RequestExecutor>,
            run_ref: ResourceRef,
            current: Option<Run>,
            polls: usize,
            cancel: Option<CancellationToken>,
        }

        let state = Watch {
            poller: self.clone(),
            executor,
            run_ref,
            current: Some(initial).filter(|r| r.status.is_in_flight()),
            polls: 0,
            cancel,
        };
        stream::unfold(state, |mut w| async move {
            let current = w.current.take()?;
            let next = w
                .poller
                .step(w.executor.as_ref(), &w.run_ref, &current, w.polls, w.cancel.as_ref())
                .await;
            w.polls += 1;
            if let Ok(run) = &next {
                if run.status.is_in_flight() {
                    w.current = Some(run.clone());
                }
            }
            Some((next, w))
        })
        .boxed()
    }

    /// Wait one interval, read the run once, and validate the observed transition.
    async fn step(
        &self,
        executor: &dyn RequestExecutor,
        run_ref: &ResourceRef,
        current: &Run,
        polls: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<Run, ClientError> {
        if let Some(limit) = self.max_polls {
            if polls >= limit {
                tracing::warn!(
                    run = %run_ref,
                    status = %current.status,
                    polls,
                    "poll limit reached"
                );
                return Err(ProtocolError::PollLimit { state: current.status, polls }.into());
            }
        }
        sleep_or_cancel(self.sleeper.as_ref(), self.interval, cancel).await?;

        let mut request = Request::read(run_ref.clone()).with_auth(self.auth.clone());
        request.cancellation = cancel.cloned();
        let next = fetch_run(executor, request).await?;

        if !current.status.can_transition_to(next.status) {
            return Err(ProtocolError::IllegalTransition {
                from: current.status,
                to: next.status,
            }
            .into());
        }
        if next.status != current.status {
            tracing::debug!(
                run = %run_ref,
                from = %current.status,
                to = %next.status,
                "run state changed"
            );
        }
        Ok(next)
    }
}

/// Builder for [`RunPoller`].
#[derive(Default)]
pub struct RunPollerBuilder {
    interval: Option<Duration>,
    max_polls: Option<usize>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl RunPollerBuilder {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Give up with [`ProtocolError::PollLimit`] after this many reads.
    pub fn max_polls(mut self, polls: usize) -> Self {
        self.max_polls = Some(polls);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    pub fn build(self) -> Result<RunPoller, BuildError> {
        let interval = self.interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        if interval.is_zero() {
            return Err(BuildError::ZeroPollInterval);
        }
        if self.max_polls == Some(0) {
            return Err(BuildError::ZeroMaxPolls);
        }
        Ok(RunPoller {
            interval,
            max_polls: self.max_polls,
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            auth: AuthContext::new(),
        })
    }
}
