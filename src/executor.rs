//! Request executor: one logical operation in, one classified outcome out.
//!
//! [`HttpExecutor`] turns a [`Request`] into a [`TransportRequest`], attaches a credential
//! from the configured [`CredentialResolver`], sends it, and classifies the outcome:
//!
//! | outcome                                   | kind             |
//! |-------------------------------------------|------------------|
//! | 409                                       | `Conflict`       |
//! | 404                                       | `NotFound`       |
//! | 401, 403, resolver denial                 | `Unauthorized`   |
//! | 429 (with retry-after hint)               | `Throttled`      |
//! | 408, 500, 502, 503, 504, network failure  | `Transient`      |
//! | any other error status                    | `InvalidRequest` |
//!
//! Executors hold no per-call state, so they are safe to wrap in retry logic. Whether a
//! repeated `Create` is harmless is the caller's concern.

use crate::auth::{AuthContext, CredentialResolver};
use crate::error::{ClientError, Failure, FailureKind, ProtocolError};
use crate::resource::{Operation, ResourceRef};
use crate::sleeper::await_or_cancel;
use crate::transport::{
    headers, Headers, StreamingResponse, Transport, TransportRequest, TransportResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A logical operation against a resource.
#[derive(Debug, Clone)]
pub struct Request {
    pub resource: ResourceRef,
    pub operation: Operation,
    /// Sub-action appended to the resource path, e.g. `cancel`.
    pub action: Option<String>,
    pub payload: Option<Value>,
    pub headers: Headers,
    pub auth: AuthContext,
    /// Cancels the call, including any retry waits around it.
    pub cancellation: Option<CancellationToken>,
}

impl Request {
    pub fn new(resource: ResourceRef, operation: Operation) -> Self {
        Self {
            resource,
            operation,
            action: None,
            payload: None,
            headers: Headers::new(),
            auth: AuthContext::new(),
            cancellation: None,
        }
    }

    pub fn create(resource: ResourceRef, payload: Value) -> Self {
        Self::new(resource, Operation::Create).with_payload(payload)
    }

    pub fn read(resource: ResourceRef) -> Self {
        Self::new(resource, Operation::Read)
    }

    pub fn update(resource: ResourceRef, payload: Value) -> Self {
        Self::new(resource, Operation::Update).with_payload(payload)
    }

    pub fn delete(resource: ResourceRef) -> Self {
        Self::new(resource, Operation::Delete)
    }

    /// Invoke a named action on a resource (`POST {resource}/{action}`).
    pub fn execute(resource: ResourceRef, action: &str) -> Self {
        let mut request = Self::new(resource, Operation::Execute);
        request.action = Some(action.to_string());
        request
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Wire path: `/{resource}` or `/{resource}/{action}`.
    pub fn path(&self) -> String {
        match &self.action {
            Some(action) => format!("/{}/{}", self.resource, action),
            None => format!("/{}", self.resource),
        }
    }
}

/// Pass-through response metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMeta {
    pub status: u16,
    pub activity_id: Option<String>,
    pub request_charge: f64,
    pub headers: Headers,
}

impl ResponseMeta {
    pub fn from_headers(status: u16, headers: Headers) -> Self {
        let activity_id = headers
            .get(headers::ACTIVITY_ID)
            .or_else(|| headers.get(headers::REQUEST_ID))
            .map(str::to_string);
        let request_charge =
            headers.get(headers::REQUEST_CHARGE).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        Self { status, activity_id, request_charge, headers }
    }
}

/// Successful outcome: payload plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T = Value> {
    pub payload: T,
    pub meta: ResponseMeta,
}

impl Response<Value> {
    /// Deserialize the payload; a shape mismatch is a protocol violation.
    pub fn decode<T: DeserializeOwned>(self) -> Result<Response<T>, ClientError> {
        let payload = serde_json::from_value(self.payload)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Response { payload, meta: self.meta })
    }
}

/// Outcome of a single logical operation.
pub type OperationResult<T = Value> = Result<Response<T>, ClientError>;

/// Issues single logical operations.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: Request) -> OperationResult;

    /// Open a server-sent event stream for `request`.
    async fn open_stream(&self, request: Request) -> Result<StreamingResponse, ClientError> {
        Err(Failure::invalid_request(format!(
            "{} does not support streaming",
            request.path()
        ))
        .into())
    }
}

#[async_trait]
impl<E> RequestExecutor for Arc<E>
where
    E: RequestExecutor + ?Sized,
{
    async fn execute(&self, request: Request) -> OperationResult {
        (**self).execute(request).await
    }

    async fn open_stream(&self, request: Request) -> Result<StreamingResponse, ClientError> {
        (**self).open_stream(request).await
    }
}

/// Executor over a [`Transport`] with optional credential resolution.
pub struct HttpExecutor<T> {
    transport: T,
    credentials: Option<Arc<dyn CredentialResolver>>,
    default_headers: Headers,
}

impl<T> std::fmt::Debug for HttpExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExecutor")
            .field("transport", &"<transport>")
            .field("credentials", &self.credentials.as_ref().map(|c| c.name()))
            .field("default_headers", &self.default_headers)
            .finish()
    }
}

impl<T: Transport> HttpExecutor<T> {
    pub fn new(transport: T) -> Self {
        Self { transport, credentials: None, default_headers: Headers::new() }
    }

    pub fn with_credentials<C>(mut self, resolver: C) -> Self
    where
        C: CredentialResolver + 'static,
    {
        self.credentials = Some(Arc::new(resolver));
        self
    }

    pub fn with_shared_credentials(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(resolver);
        self
    }

    pub fn with_default_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn build(&self, request: &Request) -> Result<TransportRequest, ClientError> {
        let mut wire_headers = self.default_headers.clone();
        wire_headers.extend(&request.headers);

        if let Some(resolver) = &self.credentials {
            let credential = resolver
                .resolve(request.operation, &request.resource, &request.auth)
                .map_err(|denied| {
                    tracing::warn!(
                        resolver = resolver.name(),
                        resource = %request.resource,
                        reason = %denied.reason,
                        "credential resolution denied"
                    );
                    Failure::from(denied)
                })?;
            wire_headers.insert(headers::AUTHORIZATION, format!("Bearer {}", credential.expose()));
        }
        if request.operation == Operation::Query {
            wire_headers.insert(headers::IS_QUERY, "true");
        }

        let body = match &request.payload {
            Some(value) => Some(Bytes::from(
                serde_json::to_vec(value).map_err(|e| Failure::invalid_request(e.to_string()))?,
            )),
            None => None,
        };

        Ok(TransportRequest {
            method: request.operation.method(),
            path: request.path(),
            headers: wire_headers,
            body,
        })
    }
}

#[async_trait]
impl<T: Transport> RequestExecutor for HttpExecutor<T> {
    async fn execute(&self, request: Request) -> OperationResult {
        let wire = self.build(&request)?;
        let send = async {
            self.transport.send(wire).await.map_err(|e| {
                tracing::debug!(path = %request.path(), error = %e, "transport failure");
                ClientError::from(Failure::transient(e.to_string()))
            })
        };
        let response = await_or_cancel(request.cancellation.as_ref(), send).await?;
        let outcome = classify(response);
        match &outcome {
            Ok(resp) => tracing::debug!(
                operation = %request.operation,
                path = %request.path(),
                status = resp.meta.status,
                charge = resp.meta.request_charge,
                "request completed"
            ),
            Err(err) => tracing::debug!(
                operation = %request.operation,
                path = %request.path(),
                error = %err,
                "request failed"
            ),
        }
        outcome
    }

    async fn open_stream(&self, request: Request) -> Result<StreamingResponse, ClientError> {
        let mut wire = self.build(&request)?;
        wire.headers.insert(headers::ACCEPT, "text/event-stream");
        let open = async {
            self.transport
                .open_stream(wire)
                .await
                .map_err(|e| ClientError::from(Failure::transient(e.to_string())))
        };
        let response = await_or_cancel(request.cancellation.as_ref(), open).await?;
        if let Some(kind) = FailureKind::from_status(response.status) {
            let meta = ResponseMeta::from_headers(response.status, response.headers);
            return Err(failure_for(kind, &meta, None).into());
        }
        Ok(response)
    }
}

/// Classify a wire response into a payload or a failure.
pub fn classify(response: TransportResponse) -> OperationResult {
    let meta = ResponseMeta::from_headers(response.status, response.headers);
    if let Some(kind) = FailureKind::from_status(meta.status) {
        return Err(failure_for(kind, &meta, response.body.as_deref()).into());
    }
    let payload = match response.body.as_deref() {
        None | Some([]) => Value::Null,
        Some(bytes) => serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Malformed(format!("response body: {e}")))?,
    };
    Ok(Response { payload, meta })
}

fn failure_for(kind: FailureKind, meta: &ResponseMeta, body: Option<&[u8]>) -> Failure {
    let message = body
        .and_then(error_message)
        .unwrap_or_else(|| format!("request failed with status {}", meta.status));
    let mut failure = Failure::new(kind, message)
        .with_status(meta.status)
        .with_activity_id(meta.activity_id.clone());
    if kind == FailureKind::Throttled {
        failure.retry_after = retry_after(&meta.headers);
    }
    failure
}

/// Pull a human-readable message out of `{"message": ..}` or `{"error": {"message": ..}}`,
/// falling back to the raw text.
fn error_message(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value
            .get("message")
            .or_else(|| value.get("error").and_then(|e| e.get("message")))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(value.to_string())),
        Err(_) => Some(String::from_utf8_lossy(body).into_owned()),
    }
}

fn retry_after(headers: &Headers) -> Option<Duration> {
    if let Some(ms) = headers.get(headers::RETRY_AFTER_MS).and_then(|v| v.parse::<f64>().ok()) {
        if ms.is_finite() && ms >= 0.0 {
            return Some(Duration::from_micros((ms * 1000.0) as u64));
        }
    }
    headers
        .get(headers::RETRY_AFTER)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StaticCredential, UserTokenResolver};
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    fn doc() -> ResourceRef {
        ResourceRef::document("shop", "orders", "1").unwrap()
    }

    #[tokio::test]
    async fn success_carries_payload_and_metadata() {
        let transport = ScriptedTransport::new().respond(
            TransportResponse::json(200, &json!({"id": "1", "total": 9}))
                .with_header(headers::ACTIVITY_ID, "act-1")
                .with_header(headers::REQUEST_CHARGE, "2.5"),
        );
        let executor = HttpExecutor::new(transport.clone());
        let resp = executor.execute(Request::read(doc())).await.unwrap();
        assert_eq!(resp.payload["total"], 9);
        assert_eq!(resp.meta.activity_id.as_deref(), Some("act-1"));
        assert_eq!(resp.meta.request_charge, 2.5);
        let sent = transport.requests();
        assert_eq!(sent[0].path, "/dbs/shop/colls/orders/docs/1");
        assert_eq!(sent[0].method.as_str(), "GET");
    }

    #[tokio::test]
    async fn conflict_is_classified_with_message() {
        let transport = ScriptedTransport::new()
            .respond(TransportResponse::json(409, &json!({"message": "id already exists"})));
        let executor = HttpExecutor::new(transport);
        let err = executor
            .execute(Request::create(doc().parent().unwrap(), json!({"id": "1"})))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.failure().unwrap().message, "id already exists");
        assert_eq!(err.failure().unwrap().status, Some(409));
    }

    #[tokio::test]
    async fn throttle_reads_retry_after_hint() {
        let transport = ScriptedTransport::new().respond(
            TransportResponse::new(429).with_header(headers::RETRY_AFTER_MS, "120"),
        );
        let err = HttpExecutor::new(transport).execute(Request::read(doc())).await.unwrap_err();
        let failure = err.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Throttled);
        assert_eq!(failure.retry_after, Some(Duration::from_millis(120)));

        let transport = ScriptedTransport::new()
            .respond(TransportResponse::new(429).with_header(headers::RETRY_AFTER, "2"));
        let err = HttpExecutor::new(transport).execute(Request::read(doc())).await.unwrap_err();
        assert_eq!(err.failure().unwrap().retry_after, Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn network_failure_is_transient() {
        let transport =
            ScriptedTransport::new().fail(crate::TransportError::Connect("reset".into()));
        let err = HttpExecutor::new(transport).execute(Request::read(doc())).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Transient));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn credential_and_query_headers_are_attached() {
        let transport = ScriptedTransport::new().respond(TransportResponse::json(200, &json!({})));
        let executor = HttpExecutor::new(transport.clone())
            .with_credentials(StaticCredential::new("s3cret"));
        let request = Request::new(doc().parent().unwrap(), Operation::Query)
            .with_payload(json!({"query": "SELECT * FROM c"}));
        executor.execute(request).await.unwrap();
        let sent = &transport.requests()[0];
        assert_eq!(sent.headers.get(headers::AUTHORIZATION), Some("Bearer s3cret"));
        assert_eq!(sent.headers.get(headers::IS_QUERY), Some("true"));
        assert_eq!(sent.method.as_str(), "POST");
    }

    #[tokio::test]
    async fn denied_credential_never_reaches_transport() {
        let transport = ScriptedTransport::new();
        let executor = HttpExecutor::new(transport.clone())
            .with_credentials(UserTokenResolver::new().block("mallory"));
        let err = executor
            .execute(Request::read(doc()).with_auth(AuthContext::for_user("mallory")))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn empty_body_is_null_and_garbage_is_protocol_error() {
        let ok = classify(TransportResponse::new(204)).unwrap();
        assert_eq!(ok.payload, Value::Null);
        let err = classify(TransportResponse::new(200).with_body("{not json")).unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn cancelled_request_is_not_sent() {
        let transport = ScriptedTransport::new().respond(TransportResponse::new(200));
        let token = CancellationToken::new();
        token.cancel();
        let err = HttpExecutor::new(transport.clone())
            .execute(Request::read(doc()).with_cancellation(token))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn decode_maps_shape_mismatch_to_protocol_error() {
        #[derive(serde::Deserialize, Debug)]
        struct Order {
            #[allow(dead_code)]
            total: u32,
        }
        let resp = Response { payload: json!({"total": "nine"}), meta: ResponseMeta::default() };
        assert!(resp.decode::<Order>().unwrap_err().is_protocol());
    }
}
