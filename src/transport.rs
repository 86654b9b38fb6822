//! Transport boundary.
//!
//! The core never speaks HTTP itself; it hands a [`TransportRequest`] to a [`Transport`]
//! and classifies what comes back. Network failures arrive as [`TransportError`], distinct
//! from HTTP error statuses, which arrive as ordinary responses.

use crate::resource::Method;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::time::Duration;

/// Header names the core reads or writes.
pub mod headers {
    pub const AUTHORIZATION: &str = "authorization";
    pub const CONTINUATION: &str = "x-ms-continuation";
    pub const MAX_ITEM_COUNT: &str = "x-ms-max-item-count";
    pub const IS_QUERY: &str = "x-ms-documentdb-isquery";
    pub const ENABLE_CROSS_PARTITION: &str = "x-ms-documentdb-query-enablecrosspartition";
    pub const PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";
    pub const ITEM_COUNT: &str = "x-ms-item-count";
    pub const ACTIVITY_ID: &str = "x-ms-activity-id";
    pub const REQUEST_ID: &str = "x-request-id";
    pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
    pub const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
    pub const RETRY_AFTER: &str = "retry-after";
    pub const ACCEPT: &str = "accept";
}

/// Case-insensitive header map; keys are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn extend(&mut self, other: &Headers) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k.as_ref(), v);
        }
        headers
    }
}

/// A request on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

/// A response on the wire, including HTTP error statuses.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Headers::new(), body: None }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status).with_body(value.to_string())
    }
}

/// Chunked response body of a streaming call.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Head of a streaming response plus its body.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: BodyStream,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"<stream>")
            .finish()
    }
}

/// Network-level failure; never an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Sends requests to the remote service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Open a streaming (server-sent events) response. Transports without push support
    /// report an error.
    async fn open_stream(
        &self,
        request: TransportRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let _ = request;
        Err(TransportError::Other("streaming is not supported by this transport".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let h = Headers::new().with("X-MS-Continuation", "abc");
        assert_eq!(h.get(headers::CONTINUATION), Some("abc"));
        assert_eq!(h.get("X-Ms-CONTINUATION"), Some("abc"));
        assert!(!h.contains(headers::ACTIVITY_ID));
    }

    #[test]
    fn headers_collect_from_pairs() {
        let h: Headers = [("A", "1"), ("b", "2")].into_iter().collect();
        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2")]);
    }
}
