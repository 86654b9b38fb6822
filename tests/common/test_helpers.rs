#![allow(dead_code)]

use catwalk::testing::{InMemoryStore, ScriptedTransport};
use catwalk::{ClientConfig, InstantSleeper, ResourceClient, ResourceRef};
use serde_json::{json, Value};

/// Route `tracing` output through the test harness; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn collection(name: &str) -> ResourceRef {
    ResourceRef::collection("shop", name).expect("valid collection ref")
}

/// Client over `store` that never really sleeps.
pub fn client(store: &InMemoryStore, config: ClientConfig) -> ResourceClient {
    ResourceClient::builder()
        .config(config)
        .sleeper(InstantSleeper)
        .build(store.clone())
        .expect("valid client config")
}

pub async fn seed(client: &ResourceClient, coll: &ResourceRef, count: usize) {
    for n in 0..count {
        client
            .create_document(coll, &json!({ "id": format!("doc-{n:02}"), "n": n }))
            .await
            .expect("seed document");
    }
}

pub fn run_json(status: &str) -> Value {
    json!({ "id": "run_1", "thread_id": "thread_1", "status": status })
}

/// Scripted run reads, one per status.
pub fn run_script(statuses: &[&str]) -> ScriptedTransport {
    statuses
        .iter()
        .fold(ScriptedTransport::new(), |t, s| t.respond_json(200, run_json(s)))
}
