mod common;

use catwalk::testing::ScriptedTransport;
use catwalk::{
    Backoff, ClientError, ExecutorService, FailureKind, HttpExecutor, InstantSleeper, Jitter,
    Request, RequestExecutor, ResourceRef, RetryPolicy, StaticCredential, TrackingSleeper,
    TransportError,
};
use common::test_helpers::init_tracing;
use serde_json::json;
use std::time::Duration;
use tower::{ServiceBuilder, ServiceExt};

fn doc() -> ResourceRef {
    ResourceRef::document("shop", "orders", "o1").unwrap()
}

fn policy(attempts: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(attempts)
        .backoff(Backoff::constant(Duration::from_millis(10)))
        .with_jitter(Jitter::None)
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap()
}

fn transient_then_ok(failures: usize) -> ScriptedTransport {
    (0..failures)
        .fold(ScriptedTransport::new(), |t, _| t.respond_json(503, json!({"message": "busy"})))
        .respond_json(200, json!({"id": "o1"}))
}

#[tokio::test]
async fn tower_stack_retries_transient_failures() {
    init_tracing();
    for n in 1..=4 {
        let transport = transient_then_ok(n - 1);
        let svc = ServiceBuilder::new()
            .layer(policy(4).into_layer())
            .service(ExecutorService::new(HttpExecutor::new(transport.clone())));
        let response = svc.oneshot(Request::read(doc())).await.unwrap();
        assert_eq!(response.payload["id"], "o1");
        assert_eq!(transport.calls(), n);
    }
}

#[tokio::test]
async fn unauthorized_is_one_call_through_the_stack() {
    init_tracing();
    let transport = ScriptedTransport::new()
        .respond_json(401, json!({"error": {"message": "bad token"}}))
        .respond_json(200, json!({"id": "o1"}));
    let svc = ServiceBuilder::new()
        .layer(policy(5).into_layer())
        .service(ExecutorService::new(
            HttpExecutor::new(transport.clone()).with_credentials(StaticCredential::new("stale")),
        ));
    let err = svc.oneshot(Request::read(doc())).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(err.failure().unwrap().message, "bad token");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn exhausted_budget_keeps_last_failure() {
    init_tracing();
    let transport = ScriptedTransport::new()
        .fail(TransportError::Connect("refused".into()))
        .respond_json(500, json!({"message": "first"}))
        .respond_json(429, json!({"message": "slow down"}));
    let sleeper = TrackingSleeper::new();
    let executor = RetryPolicy::builder()
        .max_attempts(3)
        .backoff(Backoff::exponential(Duration::from_millis(100)))
        .with_jitter(Jitter::None)
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap()
        .wrap(HttpExecutor::new(transport.clone()));

    let err = executor.execute(Request::read(doc())).await.unwrap_err();
    assert!(err.is_retry_exhausted());
    assert_eq!(err.retry_exhausted_info(), Some((3, 3)));
    assert_eq!(err.kind(), Some(FailureKind::Throttled));
    assert_eq!(err.failure().unwrap().message, "slow down");
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn non_retryable_failures_surface_unmodified() {
    init_tracing();
    for (status, kind) in [
        (400, FailureKind::InvalidRequest),
        (404, FailureKind::NotFound),
        (409, FailureKind::Conflict),
    ] {
        let transport = ScriptedTransport::new().respond_json(status, json!({"message": "nope"}));
        let err = policy(5)
            .wrap(HttpExecutor::new(transport.clone()))
            .execute(Request::read(doc()))
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            ClientError::Failure(f) if f.kind == kind && f.status == Some(status)
        ));
        assert_eq!(transport.calls(), 1);
    }
}
