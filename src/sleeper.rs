//! Injectable waiting for retry backoff and poll intervals.
//!
//! Production code sleeps on the tokio timer; tests swap in [`InstantSleeper`] or
//! [`TrackingSleeper`] to run retry and poll loops without real delays. [`sleep_or_cancel`]
//! is the single cancellable stall point shared by the retry policy and the poller.

use crate::ClientError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async {})
    }
}

/// Returns immediately and records every requested duration.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(duration);
        }
        Box::pin(async {})
    }
}

/// Wait for `duration`, or fail with [`ClientError::Cancelled`] as soon as `cancel` fires.
pub async fn sleep_or_cancel(
    sleeper: &dyn Sleeper,
    duration: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), ClientError> {
    match cancel {
        Some(token) => {
            if token.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            tokio::select! {
                _ = token.cancelled() => Err(ClientError::Cancelled),
                _ = sleeper.sleep(duration) => Ok(()),
            }
        }
        None => {
            sleeper.sleep(duration).await;
            Ok(())
        }
    }
}

/// Run `fut` unless `cancel` fires first.
pub async fn await_or_cancel<T, F>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match cancel {
        Some(token) => {
            if token.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            tokio::select! {
                _ = token.cancelled() => Err(ClientError::Cancelled),
                result = fut => result,
            }
        }
        None => fut.await,
    }
}
