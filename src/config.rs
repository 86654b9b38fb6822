//! Client configuration.
//!
//! [`ClientConfig`] deserializes from JSON with a default for every missing field, so a
//! config file only needs to name what it changes:
//!
//! ```rust
//! use catwalk::ClientConfig;
//!
//! let config =
//!     ClientConfig::from_json(r#"{ "retry_max_attempts": 5, "page_size": 50 }"#).unwrap();
//! assert_eq!(config.retry_max_attempts, 5);
//! assert_eq!(config.poll_interval_ms, 500);
//! let policy = config.retry_policy().unwrap();
//! assert_eq!(policy.max_attempts(), 5);
//! ```

use crate::backoff::Backoff;
use crate::jitter::Jitter;
use crate::poller::{RunPoller, DEFAULT_POLL_INTERVAL};
use crate::retry::{
    BuildError, RetryPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_ATTEMPTS,
};
use crate::sleeper::Sleeper;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const INTERACTIVE_MAX_ATTEMPTS: usize = 2;
const INTERACTIVE_BACKOFF_BASE_MS: u64 = 50;
const INTERACTIVE_BACKOFF_MAX_MS: u64 = 1_000;
const INTERACTIVE_POLL_INTERVAL_MS: u64 = 250;
const INTERACTIVE_MAX_POLLS: usize = 240;
const INTERACTIVE_PAGE_SIZE: usize = 25;

const BATCH_MAX_ATTEMPTS: usize = 8;
const BATCH_BACKOFF_BASE_MS: u64 = 500;
const BATCH_BACKOFF_MAX_MS: u64 = 30_000;
const BATCH_POLL_INTERVAL_MS: u64 = 2_000;
const BATCH_PAGE_SIZE: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub retry_max_attempts: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Randomize backoff delays (full jitter).
    pub jitter: bool,
    pub poll_interval_ms: u64,
    pub max_polls: Option<usize>,
    /// Default `max_item_count` for feeds; `None` leaves it to the service.
    pub page_size: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            backoff_max_ms: DEFAULT_BACKOFF_MAX.as_millis() as u64,
            jitter: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            max_polls: None,
            page_size: None,
        }
    }
}

impl ClientConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Short waits and small pages for user-facing calls.
    pub fn interactive() -> Self {
        Self {
            retry_max_attempts: INTERACTIVE_MAX_ATTEMPTS,
            backoff_base_ms: INTERACTIVE_BACKOFF_BASE_MS,
            backoff_max_ms: INTERACTIVE_BACKOFF_MAX_MS,
            jitter: true,
            poll_interval_ms: INTERACTIVE_POLL_INTERVAL_MS,
            max_polls: Some(INTERACTIVE_MAX_POLLS),
            page_size: Some(INTERACTIVE_PAGE_SIZE),
        }
    }

    /// Patient retries, slow polling and large pages for background jobs.
    pub fn batch() -> Self {
        Self {
            retry_max_attempts: BATCH_MAX_ATTEMPTS,
            backoff_base_ms: BATCH_BACKOFF_BASE_MS,
            backoff_max_ms: BATCH_BACKOFF_MAX_MS,
            jitter: true,
            poll_interval_ms: BATCH_POLL_INTERVAL_MS,
            max_polls: None,
            page_size: Some(BATCH_PAGE_SIZE),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn backoff(&self) -> Result<Backoff, BuildError> {
        Ok(Backoff::exponential(Duration::from_millis(self.backoff_base_ms))
            .with_max(Duration::from_millis(self.backoff_max_ms))?)
    }

    fn jitter(&self) -> Jitter {
        if self.jitter {
            Jitter::full()
        } else {
            Jitter::None
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, BuildError> {
        RetryPolicy::builder()
            .max_attempts(self.retry_max_attempts)
            .backoff(self.backoff()?)
            .with_jitter(self.jitter())
            .build()
    }

    /// Retry policy waiting on `sleeper` instead of the tokio timer.
    pub fn retry_policy_with_sleeper<S>(&self, sleeper: S) -> Result<RetryPolicy, BuildError>
    where
        S: Sleeper + 'static,
    {
        RetryPolicy::builder()
            .max_attempts(self.retry_max_attempts)
            .backoff(self.backoff()?)
            .with_jitter(self.jitter())
            .with_sleeper(sleeper)
            .build()
    }

    pub fn poller(&self) -> Result<RunPoller, BuildError> {
        let mut builder = RunPoller::builder().interval(self.poll_interval());
        if let Some(limit) = self.max_polls {
            builder = builder.max_polls(limit);
        }
        builder.build()
    }

    pub fn poller_with_sleeper<S>(&self, sleeper: S) -> Result<RunPoller, BuildError>
    where
        S: Sleeper + 'static,
    {
        let mut builder = RunPoller::builder().interval(self.poll_interval()).with_sleeper(sleeper);
        if let Some(limit) = self.max_polls {
            builder = builder.max_polls(limit);
        }
        builder.build()
    }

    /// Check every field without keeping the built objects.
    pub fn validate(&self) -> Result<(), BuildError> {
        self.retry_policy()?;
        self.poller()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffError;

    #[test]
    fn defaults_match_policy_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.backoff_base_ms, 200);
        assert_eq!(config.backoff_max_ms, 5_000);
        assert_eq!(config.poller().unwrap().interval(), Duration::from_millis(500));
        assert_eq!(config.poller().unwrap().max_polls(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ClientConfig::from_json(r#"{"jitter": false, "max_polls": 10}"#).unwrap();
        assert!(!config.jitter);
        assert_eq!(config.max_polls, Some(10));
        assert_eq!(config.retry_max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.page_size, None);
    }

    #[test]
    fn presets_are_valid() {
        for preset in [ClientConfig::interactive(), ClientConfig::batch()] {
            preset.validate().unwrap();
        }
        assert!(
            ClientConfig::interactive().poll_interval() < ClientConfig::batch().poll_interval()
        );
        assert_eq!(ClientConfig::interactive().poller().unwrap().max_polls(), Some(240));
    }

    #[test]
    fn invalid_values_are_build_errors() {
        let zero_attempts = ClientConfig { retry_max_attempts: 0, ..ClientConfig::default() };
        assert_eq!(zero_attempts.retry_policy().unwrap_err(), BuildError::InvalidMaxAttempts(0));

        let inverted =
            ClientConfig { backoff_base_ms: 1_000, backoff_max_ms: 10, ..ClientConfig::default() };
        assert!(matches!(
            inverted.retry_policy().unwrap_err(),
            BuildError::Backoff(BackoffError::MaxLessThanBase { .. })
        ));

        let zero_interval = ClientConfig { poll_interval_ms: 0, ..ClientConfig::default() };
        assert_eq!(zero_interval.poller().unwrap_err(), BuildError::ZeroPollInterval);

        let zero_polls = ClientConfig { max_polls: Some(0), ..ClientConfig::default() };
        assert_eq!(zero_polls.validate().unwrap_err(), BuildError::ZeroMaxPolls);
    }
}
