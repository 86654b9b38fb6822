//! Backoff schedules for retries and status polling.
//!
//! Attempt semantics: attempt `0` is the initial call (no delay); retries start at
//! `attempt = 1`. Delays saturate at [`MAX_BACKOFF`] instead of overflowing.
//!
//! ```rust
//! use std::time::Duration;
//! use catwalk::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(200))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_millis(200));
//! assert_eq!(backoff.delay(3), Duration::from_millis(800));
//! assert_eq!(backoff.delay(4), Duration::from_secs(1)); // capped
//! ```

use std::fmt;
use std::time::Duration;

/// Ceiling applied when a computed delay would overflow (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    ConstantDoesNotSupportMax,
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::ConstantDoesNotSupportMax => {
                write!(f, "with_max is only valid for linear or exponential backoff")
            }
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Constant,
    Linear,
    Exponential,
}

/// Delay schedule: constant, linear or exponential growth with an optional cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    schedule: Schedule,
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Self { schedule: Schedule::Constant, base: delay, max: None }
    }

    pub fn linear(base: Duration) -> Self {
        Self { schedule: Schedule::Linear, base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Self { schedule: Schedule::Exponential, base, max: None }
    }

    /// Cap linear or exponential growth at `max`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if self.schedule == Schedule::Constant {
            return Err(BackoffError::ConstantDoesNotSupportMax);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    /// Upper bound on any delay this schedule produces.
    pub fn ceiling(&self) -> Duration {
        match self.schedule {
            Schedule::Constant => self.base.min(MAX_BACKOFF),
            _ => self.max.unwrap_or(MAX_BACKOFF),
        }
    }

    /// Delay before `attempt` (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match self.schedule {
            Schedule::Constant => self.base,
            Schedule::Linear => {
                let factor = attempt.min(u32::MAX as usize) as u32;
                self.base.checked_mul(factor).unwrap_or(MAX_BACKOFF)
            }
            Schedule::Exponential => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = self.base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64)
            }
        };
        self.max.map_or(raw, |m| raw.min(m)).min(MAX_BACKOFF)
    }

    /// Delay before `attempt`, deferring to a server-provided retry-after hint when present.
    /// The hint is still bounded by [`Backoff::ceiling`].
    pub fn delay_with_hint(&self, attempt: usize, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.ceiling()),
            None => self.delay(attempt),
        }
    }
}
