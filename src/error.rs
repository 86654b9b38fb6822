//! Error types for the request core.
//!
//! Every call resolves to either a payload or exactly one [`ClientError`]:
//! - [`ClientError::Failure`]: a classified failure reported by the executor.
//! - [`ClientError::RetryExhausted`]: the retry budget ran out; the original failures are kept.
//! - [`ClientError::Protocol`]: the service broke the feed/run/stream contract.
//! - [`ClientError::Cancelled`]: the caller cancelled the operation.
use crate::run::RunState;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Cap the number of stored failures inside `RetryExhausted` to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The resource already exists (HTTP 409).
    Conflict,
    /// The resource does not exist (HTTP 404).
    NotFound,
    /// Credentials were rejected, or the credential resolver denied access.
    Unauthorized,
    /// The service asked the caller to slow down (HTTP 429).
    Throttled,
    /// Network failure, timeout, or a server-side hiccup.
    Transient,
    /// The request itself is wrong; never retried.
    InvalidRequest,
}

impl FailureKind {
    /// Only throttling and transient failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Throttled | FailureKind::Transient)
    }

    /// Map an HTTP status to a failure kind. Returns `None` for 1xx-3xx.
    pub fn from_status(status: u16) -> Option<Self> {
        let kind = match status {
            100..=399 => return None,
            401 | 403 => FailureKind::Unauthorized,
            404 => FailureKind::NotFound,
            408 => FailureKind::Transient,
            409 => FailureKind::Conflict,
            429 => FailureKind::Throttled,
            500 | 502 | 503 | 504 => FailureKind::Transient,
            _ => FailureKind::InvalidRequest,
        };
        Some(kind)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Conflict => "conflict",
            FailureKind::NotFound => "not found",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::Throttled => "throttled",
            FailureKind::Transient => "transient",
            FailureKind::InvalidRequest => "invalid request",
        };
        f.write_str(name)
    }
}

/// A classified failure: kind, optional HTTP status, message and retry-after hint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct Failure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub activity_id: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, status: None, message: message.into(), retry_after: None, activity_id: None }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Conflict, message).with_status(409)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message).with_status(404)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, message)
    }

    pub fn throttled(retry_after: Option<Duration>) -> Self {
        let mut failure = Self::new(FailureKind::Throttled, "request rate is too large");
        failure.status = Some(429);
        failure.retry_after = retry_after;
        failure
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidRequest, message).with_status(400)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_activity_id(mut self, activity_id: Option<String>) -> Self {
        self.activity_id = activity_id;
        self
    }
}

/// The service broke the contract the core relies on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("illegal run state transition {from} -> {to}")]
    IllegalTransition { from: RunState, to: RunState },
    #[error("page declared {declared} items but carried {actual}")]
    ItemCountMismatch { declared: usize, actual: usize },
    #[error("service returned the continuation token it was given: {0}")]
    RepeatedContinuation(String),
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("run still {state} after {polls} status checks")]
    PollLimit { state: RunState, polls: usize },
}

/// Unified error returned by executors, feeds, pollers and streams.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The request failed and was not (or no longer) eligible for retry.
    #[error(transparent)]
    Failure(#[from] Failure),
    /// All retry attempts were used up; failures are the most recent ones, oldest first.
    #[error("retry exhausted after {attempts} attempts; last error: {}", last_message(.failures))]
    RetryExhausted { attempts: usize, failures: Arc<Vec<Failure>> },
    /// Stream, feed or poll protocol violation.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    /// The caller cancelled the operation before it settled.
    #[error("operation cancelled")]
    Cancelled,
}

fn last_message(failures: &[Failure]) -> String {
    failures.last().map(ToString::to_string).unwrap_or_else(|| "none recorded".to_string())
}

impl ClientError {
    /// Construct a `RetryExhausted` variant, keeping only the most recent `MAX_RETRY_FAILURES`.
    pub fn retry_exhausted(attempts: usize, mut failures: Vec<Failure>) -> Self {
        if failures.len() > MAX_RETRY_FAILURES {
            failures.drain(..failures.len() - MAX_RETRY_FAILURES);
        }
        ClientError::RetryExhausted { attempts, failures: Arc::new(failures) }
    }

    /// The failure that decided the outcome: the failure itself, or the last one before
    /// the retry budget ran out.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::RetryExhausted { failures, .. } => failures.last(),
            _ => None,
        }
    }

    /// Kind of the deciding failure, if any.
    pub fn kind(&self) -> Option<FailureKind> {
        self.failure().map(|f| f.kind)
    }

    /// True only for a bare `Failure` whose kind is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failure(f) if f.kind.is_retryable())
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == Some(FailureKind::Conflict)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(FailureKind::NotFound)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind() == Some(FailureKind::Unauthorized)
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Access retry exhaustion info as (attempts, recorded_failures).
    pub fn retry_exhausted_info(&self) -> Option<(usize, usize)> {
        match self {
            Self::RetryExhausted { attempts, failures } => Some((*attempts, failures.len())),
            _ => None,
        }
    }

    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn status_mapping_covers_contract() {
        assert_eq!(FailureKind::from_status(200), None);
        assert_eq!(FailureKind::from_status(304), None);
        assert_eq!(FailureKind::from_status(409), Some(FailureKind::Conflict));
        assert_eq!(FailureKind::from_status(404), Some(FailureKind::NotFound));
        assert_eq!(FailureKind::from_status(401), Some(FailureKind::Unauthorized));
        assert_eq!(FailureKind::from_status(403), Some(FailureKind::Unauthorized));
        assert_eq!(FailureKind::from_status(429), Some(FailureKind::Throttled));
        assert_eq!(FailureKind::from_status(503), Some(FailureKind::Transient));
        assert_eq!(FailureKind::from_status(408), Some(FailureKind::Transient));
        assert_eq!(FailureKind::from_status(400), Some(FailureKind::InvalidRequest));
        assert_eq!(FailureKind::from_status(412), Some(FailureKind::InvalidRequest));
    }

    #[test]
    fn only_throttled_and_transient_are_retryable() {
        let retryable: Vec<_> = [
            FailureKind::Conflict,
            FailureKind::NotFound,
            FailureKind::Unauthorized,
            FailureKind::Throttled,
            FailureKind::Transient,
            FailureKind::InvalidRequest,
        ]
        .into_iter()
        .filter(|k| k.is_retryable())
        .collect();
        assert_eq!(retryable, vec![FailureKind::Throttled, FailureKind::Transient]);
    }

    #[test]
    fn failure_display_includes_status() {
        let msg = Failure::conflict("id `a` exists").to_string();
        assert!(msg.contains("conflict"));
        assert!(msg.contains("409"));
        assert!(msg.contains("id `a` exists"));
        assert_eq!(Failure::transient("reset").to_string(), "transient: reset");
    }

    #[test]
    fn retry_exhausted_keeps_last_failure() {
        let err = ClientError::retry_exhausted(
            3,
            vec![Failure::transient("first"), Failure::throttled(None)],
        );
        assert_eq!(err.kind(), Some(FailureKind::Throttled));
        assert_eq!(err.retry_exhausted_info(), Some((3, 2)));
        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("throttled"));
    }

    #[test]
    fn retry_exhausted_caps_failures() {
        let failures = (0..25).map(|i| Failure::transient(format!("f{i}"))).collect();
        let err = ClientError::retry_exhausted(25, failures);
        let (_, recorded) = err.retry_exhausted_info().unwrap();
        assert_eq!(recorded, MAX_RETRY_FAILURES);
        assert_eq!(err.failure().unwrap().message, "f24");
    }

    #[test]
    fn retry_exhausted_display_handles_empty_failures() {
        let err = ClientError::retry_exhausted(2, vec![]);
        assert!(err.to_string().contains("none recorded"));
        assert!(err.kind().is_none());
    }

    #[test]
    fn predicates_cover_variants() {
        assert!(ClientError::Cancelled.is_cancelled());
        assert!(ClientError::from(ProtocolError::MissingField("id")).is_protocol());
        let conflict = ClientError::from(Failure::conflict("dup"));
        assert!(conflict.is_conflict());
        assert!(!conflict.is_retryable());
        assert!(ClientError::from(Failure::transient("x")).is_retryable());
        assert!(ClientError::from(Failure::unauthorized("blocked")).is_unauthorized());
    }

    #[test]
    fn failure_is_source_transparent() {
        let err = ClientError::from(Failure::not_found("gone"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found (404): gone");
        assert!(err.source().is_none());
    }
}
