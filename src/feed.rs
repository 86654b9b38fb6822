//! Continuation-token feed iteration.
//!
//! A [`FeedIterator`] turns a paginated read into a lazy sequence of [`Page`]s. Each pull
//! issues exactly one executor call carrying the previous page's continuation token; the
//! sequence ends with the first page that has none. Page N+1 is never requested before
//! page N's token is known, and an iterator's token never leaks into another iterator.
//!
//! The same iterator can be consumed three ways without duplicating calls:
//! - pull: [`FeedIterator::next_page`] or [`FeedIterator::into_stream`];
//! - push: [`FeedIterator::for_each_page`], with early exit via `ControlFlow::Break`;
//! - materialize: [`FeedIterator::collect_all`].
//!
//! An empty result set is one page with zero items and no continuation, not zero pages.

use crate::auth::AuthContext;
use crate::error::{ClientError, ProtocolError};
use crate::executor::{Request, RequestExecutor, Response};
use crate::resource::{Operation, ResourceRef};
use crate::transport::{headers, Headers};
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Body fields that may carry a page's items, in lookup order.
const ITEM_FIELDS: [&str; 3] = ["Documents", "data", "items"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: Value,
}

/// What to read: a parameterized query, or the whole feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: Option<String>,
    parameters: Vec<QueryParameter>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), parameters: Vec::new() }
    }

    /// Read every item of the feed without a query.
    pub fn read_all() -> Self {
        Self { text: None, parameters: Vec::new() }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(QueryParameter { name: name.into(), value: value.into() });
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn payload(&self, options: &FeedOptions) -> Value {
        let mut body = json!({ "query": self.text, "parameters": self.parameters });
        if !options.order_by.is_empty() {
            body["orderBy"] = json!(options
                .order_by
                .iter()
                .map(|o| json!({ "field": o.field, "descending": o.descending }))
                .collect::<Vec<_>>());
        }
        body
    }
}

/// Ordering hint forwarded with a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Per-iterator feed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOptions {
    /// Page-size hint; the service may return fewer items.
    pub max_item_count: Option<usize>,
    pub enable_cross_partition: bool,
    pub order_by: Vec<OrderBy>,
    pub partition_key: Option<String>,
    /// Resume from a token saved from an earlier iteration.
    pub continuation: Option<String>,
}

impl FeedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_item_count(mut self, n: usize) -> Self {
        self.max_item_count = Some(n);
        self
    }

    pub fn cross_partition(mut self, enabled: bool) -> Self {
        self.enable_cross_partition = enabled;
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy { field: field.into(), descending });
        self
    }

    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn continuation(mut self, token: impl Into<String>) -> Self {
        self.continuation = Some(token.into());
        self
    }
}

/// Metadata of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMeta {
    pub item_count: usize,
    pub request_charge: f64,
    pub activity_id: Option<String>,
    pub headers: Headers,
}

/// One page of a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    items: Vec<T>,
    continuation: Option<String>,
    meta: PageMeta,
}

impl<T> Page<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }

    pub fn meta(&self) -> &PageMeta {
        &self.meta
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Start(Option<String>),
    Next(String),
    Done,
}

/// Lazy, continuation-ordered sequence of pages.
pub struct FeedIterator<T> {
    executor: Arc<dyn RequestExecutor>,
    resource: ResourceRef,
    query: Query,
    options: FeedOptions,
    auth: AuthContext,
    cancellation: Option<CancellationToken>,
    cursor: Cursor,
    pages: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for FeedIterator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedIterator")
            .field("resource", &self.resource)
            .field("query", &self.query)
            .field("options", &self.options)
            .field("cursor", &self.cursor)
            .field("pages", &self.pages)
            .finish()
    }
}

impl<T> FeedIterator<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn open(
        executor: Arc<dyn RequestExecutor>,
        resource: ResourceRef,
        query: Query,
        options: FeedOptions,
    ) -> Self {
        let cursor = Cursor::Start(options.continuation.clone());
        Self {
            executor,
            resource,
            query,
            options,
            auth: AuthContext::new(),
            cancellation: None,
            cursor,
            pages: 0,
            _item: PhantomData,
        }
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// A fresh iterator over the same query, starting from the beginning (or from the
    /// configured resume token). Shares no cursor state with `self`.
    pub fn restart(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            resource: self.resource.clone(),
            query: self.query.clone(),
            options: self.options.clone(),
            auth: self.auth.clone(),
            cancellation: self.cancellation.clone(),
            cursor: Cursor::Start(self.options.continuation.clone()),
            pages: 0,
            _item: PhantomData,
        }
    }

    /// Pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub fn is_done(&self) -> bool {
        self.cursor == Cursor::Done
    }

    fn request(&self, token: Option<&str>) -> Request {
        let mut request = match self.query.text {
            Some(_) => Request::new(self.resource.clone(), Operation::Query)
                .with_payload(self.query.payload(&self.options)),
            None => Request::read(self.resource.clone()),
        }
        .with_auth(self.auth.clone());
        if let Some(n) = self.options.max_item_count {
            request.headers.insert(headers::MAX_ITEM_COUNT, n.to_string());
        }
        if let Some(token) = token {
            request.headers.insert(headers::CONTINUATION, token);
        }
        if self.options.enable_cross_partition {
            request.headers.insert(headers::ENABLE_CROSS_PARTITION, "true");
        }
        if let Some(pk) = &self.options.partition_key {
            request.headers.insert(headers::PARTITION_KEY, pk.clone());
        }
        request.cancellation = self.cancellation.clone();
        request
    }

    /// Fetch the next page, or `None` once the feed is exhausted. After an error the
    /// iterator is finished.
    pub async fn next_page(&mut self) -> Option<Result<Page<T>, ClientError>> {
        let sent = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return None,
            Cursor::Start(token) => token,
            Cursor::Next(token) => Some(token),
        };
        let request = self.request(sent.as_deref());
        let result = match self.executor.execute(request).await {
            Ok(response) => parse_page::<T>(response, sent.as_deref()),
            Err(e) => Err(e),
        };
        match result {
            Ok(page) => {
                self.pages += 1;
                tracing::debug!(
                    resource = %self.resource,
                    page = self.pages,
                    items = page.len(),
                    charge = page.meta.request_charge,
                    has_more = !page.is_last(),
                    "feed page fetched"
                );
                if let Some(token) = &page.continuation {
                    self.cursor = Cursor::Next(token.clone());
                }
                Some(Ok(page))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Push each page into `on_page` until the feed ends or the callback breaks.
    /// Returns the number of pages delivered.
    pub async fn for_each_page<F>(&mut self, mut on_page: F) -> Result<usize, ClientError>
    where
        F: FnMut(Page<T>) -> ControlFlow<()>,
    {
        let mut delivered = 0;
        while let Some(page) = self.next_page().await {
            delivered += 1;
            if on_page(page?).is_break() {
                break;
            }
        }
        Ok(delivered)
    }

    /// Drain the remaining pages into one ordered vector of items.
    pub async fn collect_all(mut self) -> Result<Vec<T>, ClientError> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await {
            items.extend(page?.items);
        }
        Ok(items)
    }

    /// Drain the remaining pages, keeping page boundaries.
    pub async fn collect_pages(mut self) -> Result<Vec<Page<T>>, ClientError> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await {
            pages.push(page?);
        }
        Ok(pages)
    }

    /// Pull-based stream of pages.
    pub fn into_stream(self) -> BoxStream<'static, Result<Page<T>, ClientError>> {
        stream::unfold(self, |mut feed| async move {
            feed.next_page().await.map(|page| (page, feed))
        })
        .boxed()
    }
}

fn parse_page<T: DeserializeOwned>(
    response: Response,
    sent: Option<&str>,
) -> Result<Page<T>, ClientError> {
    let Response { payload, meta } = response;
    let raw_items = match payload {
        Value::Array(items) => items,
        Value::Object(mut body) => {
            let declared = body.get("_count").and_then(Value::as_u64);
            let field = ITEM_FIELDS
                .iter()
                .find(|f| body.get(**f).is_some_and(Value::is_array))
                .ok_or(ProtocolError::MissingField("Documents"))?;
            let items = match body.remove(*field) {
                Some(Value::Array(items)) => items,
                _ => return Err(ProtocolError::MissingField("Documents").into()),
            };
            if let Some(declared) = declared {
                check_count(declared as usize, items.len())?;
            }
            items
        }
        _ => return Err(ProtocolError::MissingField("Documents").into()),
    };

    if let Some(declared) = meta.headers.get(headers::ITEM_COUNT).and_then(|v| v.parse().ok()) {
        check_count(declared, raw_items.len())?;
    }

    let items = raw_items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ProtocolError::Malformed(format!("feed item: {e}")))?;

    let continuation = meta
        .headers
        .get(headers::CONTINUATION)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    if let (Some(next), Some(sent)) = (&continuation, sent) {
        if next == sent {
            return Err(ProtocolError::RepeatedContinuation(next.clone()).into());
        }
    }

    Ok(Page {
        continuation,
        meta: PageMeta {
            item_count: items.len(),
            request_charge: meta.request_charge,
            activity_id: meta.activity_id,
            headers: meta.headers,
        },
        items,
    })
}

fn check_count(declared: usize, actual: usize) -> Result<(), ProtocolError> {
    if declared != actual {
        return Err(ProtocolError::ItemCountMismatch { declared, actual });
    }
    Ok(())
}
