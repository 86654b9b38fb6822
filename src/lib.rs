#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Catwalk
//!
//! Async resource-client core: a uniform request executor with conflict-aware, retryable
//! failure semantics, continuation-token feeds, polling of long-running runs, and a decoder
//! for pushed run updates.
//!
//! ## Features
//!
//! - **Request executor** classifying every outcome into a payload or one [`Failure`]
//! - **Retry policy** with backoff, jitter and server retry-after hints, as a decorator or
//!   a tower layer
//! - **Feed iterator** with pull, push and collect modes over continuation tokens
//! - **Run poller** with transition checks, poll limits and cancellation
//! - **Update stream** decoding server-sent events into [`StreamUpdate`]s
//!
//! ## Quick Start
//!
//! ```rust
//! use catwalk::testing::InMemoryStore;
//! use catwalk::{ClientConfig, InstantSleeper, Query, ResourceClient, ResourceRef};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ResourceClient::builder()
//!         .config(ClientConfig { page_size: Some(2), ..ClientConfig::default() })
//!         .sleeper(InstantSleeper)
//!         .build(InMemoryStore::new())?;
//!
//!     let orders = ResourceRef::collection("shop", "orders")?;
//!     for n in 0..5 {
//!         client.create_document(&orders, &json!({ "id": format!("o{n}") })).await?;
//!     }
//!
//!     let all: Vec<Value> = client.query(&orders, Query::read_all()).collect_all().await?;
//!     assert_eq!(all.len(), 5);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod feed;
pub mod jitter;
pub mod poller;
pub mod prelude;
pub mod resource;
pub mod retry;
pub mod run;
pub mod sleeper;
pub mod sse;
pub mod stream;
pub mod testing;
pub mod transport;

// Re-exports
pub use auth::{
    AccessDenied, AuthContext, Credential, CredentialResolver, StaticCredential, UserTokenResolver,
};
pub use backoff::{Backoff, BackoffError};
pub use client::{ResourceClient, ResourceClientBuilder};
pub use config::ClientConfig;
pub use error::{ClientError, Failure, FailureKind, ProtocolError};
pub use executor::{
    HttpExecutor, OperationResult, Request, RequestExecutor, Response, ResponseMeta,
};
pub use feed::{FeedIterator, FeedOptions, Page, PageMeta, Query};
pub use jitter::Jitter;
pub use poller::{RunPoller, RunPollerBuilder};
pub use resource::{Method, Operation, ResourceRef};
pub use retry::{
    BuildError, ExecutorService, RetryLayer, RetryPolicy, RetryPolicyBuilder, RetryService,
    Retrying,
};
pub use run::{RequiredAction, Run, RunState, ToolCall, ToolOutput};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stream::{StreamUpdate, UpdateStream};
pub use transport::{
    Headers, StreamingResponse, Transport, TransportError, TransportRequest, TransportResponse,
};
