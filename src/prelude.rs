//! Convenient re-exports for common Catwalk types.
pub use crate::{
    auth::{AuthContext, CredentialResolver},
    backoff::{Backoff, MAX_BACKOFF},
    client::ResourceClient,
    config::ClientConfig,
    error::{ClientError, Failure, FailureKind, ProtocolError},
    executor::{Request, RequestExecutor, Response},
    feed::{FeedIterator, FeedOptions, Page, Query},
    jitter::Jitter,
    poller::RunPoller,
    resource::ResourceRef,
    retry::{RetryLayer, RetryPolicy},
    run::{Run, RunState, ToolOutput},
    stream::{StreamUpdate, UpdateStream},
};
