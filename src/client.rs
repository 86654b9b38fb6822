//! One handle bundling an executor, its retry policy, a poller and the caller's identity.

use crate::auth::{AuthContext, CredentialResolver};
use crate::config::ClientConfig;
use crate::error::{ClientError, Failure};
use crate::executor::{
    HttpExecutor, OperationResult, Request, RequestExecutor, Response, ResponseMeta,
};
use crate::feed::{FeedIterator, FeedOptions, Query};
use crate::poller::RunPoller;
use crate::resource::ResourceRef;
use crate::retry::BuildError;
use crate::run::{self, Run, ToolOutput};
use crate::sleeper::Sleeper;
use crate::stream::UpdateStream;
use crate::transport::Transport;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Facade over documents, feeds and runs.
///
/// Cloning is cheap; clones share the executor and policies.
#[derive(Clone)]
pub struct ResourceClient {
    executor: Arc<dyn RequestExecutor>,
    poller: RunPoller,
    config: ClientConfig,
    auth: AuthContext,
}

impl std::fmt::Debug for ResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceClient")
            .field("poller", &self.poller)
            .field("config", &self.config)
            .field("auth", &self.auth)
            .finish()
    }
}

impl ResourceClient {
    pub fn builder() -> ResourceClientBuilder {
        ResourceClientBuilder::default()
    }

    /// Client over `transport` with retries and polling configured from `config`.
    pub fn new<T: Transport + 'static>(
        transport: T,
        config: ClientConfig,
    ) -> Result<Self, BuildError> {
        Self::builder().config(config).build(transport)
    }

    pub fn executor(&self) -> &Arc<dyn RequestExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A clone acting as another caller. Shares executor and policies.
    pub fn with_auth(&self, auth: AuthContext) -> Self {
        Self {
            executor: self.executor.clone(),
            poller: self.poller.clone().with_auth(auth.clone()),
            config: self.config.clone(),
            auth,
        }
    }

    async fn send(&self, request: Request) -> OperationResult {
        self.executor.execute(request.with_auth(self.auth.clone())).await
    }

    async fn send_run(&self, request: Request) -> Result<Run, ClientError> {
        run::fetch_run(self.executor.as_ref(), request.with_auth(self.auth.clone())).await
    }

    pub async fn create_document<D: Serialize + ?Sized>(
        &self,
        collection: &ResourceRef,
        document: &D,
    ) -> OperationResult {
        self.send(Request::create(collection.clone(), to_value(document)?)).await
    }

    pub async fn read_document<T: DeserializeOwned>(
        &self,
        document: &ResourceRef,
    ) -> Result<Response<T>, ClientError> {
        self.send(Request::read(document.clone())).await?.decode()
    }

    pub async fn replace_document<D: Serialize + ?Sized>(
        &self,
        document: &ResourceRef,
        body: &D,
    ) -> OperationResult {
        self.send(Request::update(document.clone(), to_value(body)?)).await
    }

    pub async fn delete_document(
        &self,
        document: &ResourceRef,
    ) -> Result<ResponseMeta, ClientError> {
        Ok(self.send(Request::delete(document.clone())).await?.meta)
    }

    /// Feed over `collection` using the configured default page size.
    pub fn query<T>(&self, collection: &ResourceRef, query: Query) -> FeedIterator<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut options = FeedOptions::new();
        options.max_item_count = self.config.page_size;
        self.query_with(collection, query, options)
    }

    pub fn query_with<T>(
        &self,
        collection: &ResourceRef,
        query: Query,
        options: FeedOptions,
    ) -> FeedIterator<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        FeedIterator::open(self.executor.clone(), collection.clone(), query, options)
            .with_auth(self.auth.clone())
    }

    /// Every item of `collection`, page by page.
    pub fn read_feed<T>(&self, collection: &ResourceRef) -> FeedIterator<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.query(collection, Query::read_all())
    }

    pub async fn create_run(
        &self,
        thread: &ResourceRef,
        params: Value,
    ) -> Result<Run, ClientError> {
        self.send_run(run::create_run_request(thread, params)).await
    }

    pub async fn retrieve_run(&self, run_ref: &ResourceRef) -> Result<Run, ClientError> {
        self.send_run(Request::read(run_ref.clone())).await
    }

    pub async fn cancel_run(&self, run_ref: &ResourceRef) -> Result<Run, ClientError> {
        self.send_run(run::cancel_run_request(run_ref)).await
    }

    pub async fn submit_tool_outputs(
        &self,
        run_ref: &ResourceRef,
        outputs: &[ToolOutput],
    ) -> Result<Run, ClientError> {
        self.send_run(run::submit_tool_outputs_request(run_ref, outputs, false)).await
    }

    /// Poll `run` until it settles or requires action.
    pub async fn wait_for_run(&self, run: Run) -> Result<Run, ClientError> {
        self.wait_for_run_with_cancel(run, None).await
    }

    pub async fn wait_for_run_with_cancel(
        &self,
        run: Run,
        cancel: Option<&CancellationToken>,
    ) -> Result<Run, ClientError> {
        let run_ref = run.resource()?;
        self.poller.poll_with_cancel(self.executor.as_ref(), &run_ref, run, cancel).await
    }

    /// Snapshots of `run` as the poller observes them.
    pub fn watch_run(
        &self,
        run: Run,
        cancel: Option<CancellationToken>,
    ) -> Result<BoxStream<'static, Result<Run, ClientError>>, ClientError> {
        let run_ref = run.resource()?;
        Ok(self.poller.watch(self.executor.clone(), run_ref, run, cancel))
    }

    /// Start a run and stream its updates instead of polling.
    pub async fn stream_run(
        &self,
        thread: &ResourceRef,
        mut params: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<UpdateStream, ClientError> {
        if let Value::Object(map) = &mut params {
            map.insert("stream".into(), Value::Bool(true));
        }
        let mut request = run::create_run_request(thread, params).with_auth(self.auth.clone());
        request.cancellation = cancel;
        UpdateStream::open(self.executor.as_ref(), request).await
    }

    /// Submit tool outputs and stream what the run does next.
    pub async fn stream_tool_outputs(
        &self,
        run_ref: &ResourceRef,
        outputs: &[ToolOutput],
        cancel: Option<CancellationToken>,
    ) -> Result<UpdateStream, ClientError> {
        let mut request =
            run::submit_tool_outputs_request(run_ref, outputs, true).with_auth(self.auth.clone());
        request.cancellation = cancel;
        UpdateStream::open(self.executor.as_ref(), request).await
    }
}

fn to_value<D: Serialize + ?Sized>(value: &D) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|e| Failure::invalid_request(e.to_string()).into())
}

/// Builder for [`ResourceClient`].
#[derive(Default)]
pub struct ResourceClientBuilder {
    config: ClientConfig,
    credentials: Option<Arc<dyn CredentialResolver>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    auth: AuthContext,
}

impl ResourceClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn credentials<C>(mut self, resolver: C) -> Self
    where
        C: CredentialResolver + 'static,
    {
        self.credentials = Some(Arc::new(resolver));
        self
    }

    /// Clock used for both retry backoff and poll intervals.
    pub fn sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    pub fn auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    pub fn build<T: Transport + 'static>(
        mut self,
        transport: T,
    ) -> Result<ResourceClient, BuildError> {
        let mut http = HttpExecutor::new(transport);
        if let Some(resolver) = self.credentials.take() {
            http = http.with_shared_credentials(resolver);
        }
        self.build_with_executor(http)
    }

    /// Wrap an existing executor with the configured retry policy.
    pub fn build_with_executor<E: RequestExecutor + 'static>(
        self,
        executor: E,
    ) -> Result<ResourceClient, BuildError> {
        let (retry, poller) = match self.sleeper {
            Some(sleeper) => (
                self.config.retry_policy_with_sleeper(SharedSleeper(sleeper.clone()))?,
                self.config.poller_with_sleeper(SharedSleeper(sleeper))?,
            ),
            None => (self.config.retry_policy()?, self.config.poller()?),
        };
        tracing::debug!(
            max_attempts = retry.max_attempts(),
            poll_interval_ms = self.config.poll_interval_ms,
            "resource client configured"
        );
        Ok(ResourceClient {
            executor: Arc::new(retry.wrap(executor)),
            poller: poller.with_auth(self.auth.clone()),
            config: self.config,
            auth: self.auth,
        })
    }
}

#[derive(Debug)]
struct SharedSleeper(Arc<dyn Sleeper>);

impl Sleeper for SharedSleeper {
    fn sleep(
        &self,
        duration: std::time::Duration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        self.0.sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserTokenResolver;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use crate::testing::{InMemoryStore, ScriptedTransport};
    use crate::transport::headers;
    use crate::run::RunState;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: String,
        total: u32,
    }

    fn orders() -> ResourceRef {
        ResourceRef::collection("shop", "orders").unwrap()
    }

    #[tokio::test]
    async fn document_crud_round_trip() {
        let store = InMemoryStore::new();
        let client =
            ResourceClient::builder().sleeper(InstantSleeper).build(store.clone()).unwrap();
        let order = Order { id: "o1".into(), total: 30 };

        let created = client.create_document(&orders(), &order).await.unwrap();
        assert_eq!(created.meta.status, 201);
        let doc = orders().child("docs", "o1").unwrap();
        let first: Response<Order> = client.read_document(&doc).await.unwrap();
        let second: Response<Order> = client.read_document(&doc).await.unwrap();
        assert_eq!(first.payload, order);
        assert_eq!(first.payload, second.payload);

        client.replace_document(&doc, &Order { id: "o1".into(), total: 45 }).await.unwrap();
        assert_eq!(client.read_document::<Order>(&doc).await.unwrap().payload.total, 45);

        let meta = client.delete_document(&doc).await.unwrap();
        assert_eq!(meta.status, 204);
        assert!(client.read_document::<Order>(&doc).await.unwrap_err().is_not_found());
        assert!(store.is_empty(&orders()));
    }

    #[tokio::test]
    async fn duplicate_create_is_one_call_conflict() {
        let store = InMemoryStore::new();
        let client =
            ResourceClient::builder().sleeper(InstantSleeper).build(store.clone()).unwrap();
        client.create_document(&orders(), &json!({"id": "dup"})).await.unwrap();
        let before = store.calls();
        let err =
            client.create_document(&orders(), &json!({"id": "dup", "x": 1})).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.calls() - before, 1);
        assert_eq!(store.len(&orders()), 1);
    }

    #[tokio::test]
    async fn throttling_is_absorbed_by_configured_retries() {
        let store = InMemoryStore::new();
        let sleeper = TrackingSleeper::new();
        let client = ResourceClient::builder()
            .config(ClientConfig { retry_max_attempts: 4, ..ClientConfig::default() })
            .sleeper(sleeper.clone())
            .build(store.clone())
            .unwrap();
        store.throttle_next(3);
        client.create_document(&orders(), &json!({"id": "a"})).await.unwrap();
        assert_eq!(store.calls(), 4);
        assert_eq!(sleeper.calls(), vec![std::time::Duration::from_millis(5); 3]);
    }

    #[tokio::test]
    async fn feeds_use_configured_page_size() {
        let store = InMemoryStore::new();
        let client = ResourceClient::builder()
            .config(ClientConfig { page_size: Some(4), ..ClientConfig::default() })
            .sleeper(InstantSleeper)
            .build(store.clone())
            .unwrap();
        for n in 0..10 {
            client
                .create_document(&orders(), &json!({"id": format!("o{n}"), "total": n}))
                .await
                .unwrap();
        }
        let pages = client.read_feed::<Order>(&orders()).collect_pages().await.unwrap();
        assert_eq!(pages.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![4, 4, 2]);

        let queried: Vec<Order> = client
            .query(&orders(), Query::new("SELECT * FROM c"))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(queried.len(), 10);
    }

    #[tokio::test]
    async fn auth_context_selects_credentials() {
        let transport = ScriptedTransport::new()
            .respond_json(200, json!({"id": "o1", "total": 1}))
            .respond_json(200, json!({"id": "o1", "total": 1}));
        let client = ResourceClient::builder()
            .credentials(UserTokenResolver::new().grant("alice", orders(), "alice-token"))
            .sleeper(InstantSleeper)
            .build(transport.clone())
            .unwrap();
        let doc = orders().child("docs", "o1").unwrap();

        let alice = client.with_auth(AuthContext::for_user("alice"));
        alice.read_document::<Order>(&doc).await.unwrap();
        assert_eq!(
            transport.requests()[0].headers.get(headers::AUTHORIZATION),
            Some("Bearer alice-token")
        );

        let err = client
            .with_auth(AuthContext::for_user("bob"))
            .read_document::<Order>(&doc)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn run_lifecycle_through_the_facade() {
        let transport = ScriptedTransport::new()
            .respond_json(200, json!({"id": "r", "thread_id": "t", "status": "queued"}))
            .respond_json(200, json!({"id": "r", "thread_id": "t", "status": "in_progress"}))
            .respond_json(200, json!({"id": "r", "thread_id": "t", "status": "completed"}));
        let client =
            ResourceClient::builder().sleeper(InstantSleeper).build(transport.clone()).unwrap();
        let thread = ResourceRef::thread("t").unwrap();

        let run = client.create_run(&thread, json!({"assistant_id": "a"})).await.unwrap();
        let settled = client.wait_for_run(run).await.unwrap();
        assert_eq!(settled.status, RunState::Completed);
        assert_eq!(transport.calls(), 3);
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn invalid_config_fails_to_build() {
        let err = ResourceClient::new(
            InMemoryStore::new(),
            ClientConfig { poll_interval_ms: 0, ..ClientConfig::default() },
        )
        .unwrap_err();
        assert_eq!(err, BuildError::ZeroPollInterval);
    }
}
