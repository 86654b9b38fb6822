//! Test doubles for the transport boundary.
//!
//! - [`ScriptedTransport`] replays canned responses in order and records every request.
//! - [`InMemoryStore`] is a tiny document service: create/read/replace/delete, read-feed and
//!   query with continuation paging, conflict on duplicate ids, and injectable throttling.

use crate::resource::{Method, ResourceRef};
use crate::transport::{
    headers, Headers, StreamingResponse, Transport, TransportError, TransportRequest,
    TransportResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
enum Scripted {
    Respond(TransportResponse),
    Fail(TransportError),
    Stream { status: u16, chunks: Vec<Bytes>, end: BodyEnd },
}

/// How a scripted stream body ends after its chunks.
#[derive(Debug)]
enum BodyEnd {
    Close,
    Hang,
    Fail(TransportError),
}

/// Replays scripted outcomes in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, item: Scripted) -> Self {
        lock(&self.script).push_back(item);
        self
    }

    pub fn respond(self, response: TransportResponse) -> Self {
        self.push(Scripted::Respond(response))
    }

    pub fn respond_json(self, status: u16, body: Value) -> Self {
        self.respond(TransportResponse::json(status, &body))
    }

    pub fn fail(self, error: TransportError) -> Self {
        self.push(Scripted::Fail(error))
    }

    fn stream_with(self, status: u16, chunks: &[&str], end: BodyEnd) -> Self {
        let chunks = chunks.iter().map(|c| Bytes::from(c.to_string())).collect();
        self.push(Scripted::Stream { status, chunks, end })
    }

    /// Streaming response delivering `chunks`, then closing.
    pub fn stream(self, status: u16, chunks: &[&str]) -> Self {
        self.stream_with(status, chunks, BodyEnd::Close)
    }

    /// Streaming response delivering `chunks`, then staying open forever.
    pub fn stream_then_hang(self, status: u16, chunks: &[&str]) -> Self {
        self.stream_with(status, chunks, BodyEnd::Hang)
    }

    /// Streaming response delivering `chunks`, then yielding `error` from the body.
    pub fn stream_then_fail(self, status: u16, chunks: &[&str], error: TransportError) -> Self {
        self.stream_with(status, chunks, BodyEnd::Fail(error))
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    fn next(&self, request: TransportRequest) -> Option<Scripted> {
        lock(&self.requests).push(request);
        lock(&self.script).pop_front()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        match self.next(request) {
            Some(Scripted::Respond(resp)) => Ok(resp),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Stream { .. }) => {
                Err(TransportError::Other("scripted a stream but got a plain send".into()))
            }
            None => Err(TransportError::Other("script exhausted".into())),
        }
    }

    async fn open_stream(
        &self,
        request: TransportRequest,
    ) -> Result<StreamingResponse, TransportError> {
        match self.next(request) {
            Some(Scripted::Stream { status, chunks, end }) => {
                let body = stream::iter(chunks.into_iter().map(Ok::<Bytes, TransportError>));
                let body = match end {
                    BodyEnd::Close => body.boxed(),
                    BodyEnd::Hang => body.chain(stream::pending()).boxed(),
                    BodyEnd::Fail(err) => {
                        body.chain(stream::once(async move { Err(err) })).boxed()
                    }
                };
                Ok(StreamingResponse { status, headers: Headers::new(), body })
            }
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Respond(resp)) => Ok(StreamingResponse {
                status: resp.status,
                headers: resp.headers,
                body: stream::iter(resp.body.into_iter().map(Ok::<Bytes, TransportError>)).boxed(),
            }),
            None => Err(TransportError::Other("script exhausted".into())),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    /// Collection path -> documents in insertion order.
    collections: BTreeMap<String, Vec<Value>>,
    throttle_remaining: usize,
    activity: u64,
    calls: usize,
}

/// In-memory document service speaking the wire conventions of [`crate::HttpExecutor`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `n` calls with 429.
    pub fn throttle_next(&self, n: usize) {
        lock(&self.state).throttle_remaining = n;
    }

    /// Total requests received, including throttled ones.
    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }

    pub fn len(&self, collection: &ResourceRef) -> usize {
        lock(&self.state).collections.get(&collection.path()).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &ResourceRef) -> bool {
        self.len(collection) == 0
    }

    fn handle(&self, request: TransportRequest) -> TransportResponse {
        let mut state = lock(&self.state);
        state.calls += 1;
        state.activity += 1;
        let activity = format!("act-{}", state.activity);
        if state.throttle_remaining > 0 {
            state.throttle_remaining -= 1;
            return TransportResponse::new(429)
                .with_header(headers::RETRY_AFTER_MS, "5")
                .with_header(headers::ACTIVITY_ID, activity);
        }

        let path = request.path.trim_matches('/').to_string();
        let parts: Vec<&str> = path.split('/').collect();
        let body: Option<Value> =
            request.body.as_deref().and_then(|b| serde_json::from_slice(b).ok());

        let response = match (request.method, parts.as_slice()) {
            (Method::Post, ["dbs", _, "colls", _])
                if request.headers.contains(headers::IS_QUERY) =>
            {
                feed_page(&state, &path, &request.headers)
            }
            (Method::Get, ["dbs", _, "colls", _]) => feed_page(&state, &path, &request.headers),
            (Method::Post, ["dbs", _, "colls", _]) => {
                let Some(doc) = body else {
                    return error(400, "document body required");
                };
                let Some(id) = doc.get("id").and_then(Value::as_str).map(str::to_string) else {
                    return error(400, "document must have a string `id`");
                };
                let docs = state.collections.entry(path.clone()).or_default();
                if docs.iter().any(|d| d["id"] == id.as_str()) {
                    error(409, &format!("document `{id}` already exists"))
                } else {
                    docs.push(doc.clone());
                    TransportResponse::json(201, &doc)
                }
            }
            (method, ["dbs", db, "colls", coll, "docs", id]) => {
                let coll_path = format!("dbs/{db}/colls/{coll}");
                let docs = state.collections.entry(coll_path).or_default();
                let pos = docs.iter().position(|d| d["id"] == *id);
                match (method, pos) {
                    (_, None) => error(404, &format!("document `{id}` not found")),
                    (Method::Get, Some(i)) => TransportResponse::json(200, &docs[i]),
                    (Method::Put, Some(i)) => match body {
                        Some(doc) => {
                            docs[i] = doc.clone();
                            TransportResponse::json(200, &doc)
                        }
                        None => error(400, "document body required"),
                    },
                    (Method::Delete, Some(i)) => {
                        docs.remove(i);
                        TransportResponse::new(204)
                    }
                    (Method::Post, Some(_)) => error(405, "cannot POST to a document"),
                }
            }
            _ => error(400, &format!("unsupported route {} {}", request.method, request.path)),
        };
        response
            .with_header(headers::ACTIVITY_ID, activity)
            .with_header(headers::REQUEST_CHARGE, "1.0")
    }
}

fn error(status: u16, message: &str) -> TransportResponse {
    TransportResponse::json(status, &json!({ "message": message }))
}

fn feed_page(state: &StoreState, path: &str, request_headers: &Headers) -> TransportResponse {
    let docs = state.collections.get(path).map(Vec::as_slice).unwrap_or_default();
    let start: usize = request_headers
        .get(headers::CONTINUATION)
        .and_then(|t| t.parse().ok())
        .unwrap_or(0)
        .min(docs.len());
    let size = request_headers
        .get(headers::MAX_ITEM_COUNT)
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(100);
    let end = (start + size).min(docs.len());
    let page = &docs[start..end];
    let mut resp = TransportResponse::json(200, &json!({ "Documents": page, "_count": page.len() }))
        .with_header(headers::ITEM_COUNT, page.len().to_string());
    if end < docs.len() {
        resp = resp.with_header(headers::CONTINUATION, end.to_string());
    }
    resp
}

#[async_trait]
impl Transport for InMemoryStore {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        Ok(self.handle(request))
    }
}
