mod common;

use catwalk::testing::InMemoryStore;
use catwalk::{ClientConfig, FeedOptions, Query};
use common::test_helpers::{client, collection, init_tracing, seed};
use futures::StreamExt;
use serde::Deserialize;
use std::ops::ControlFlow;

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Doc {
    id: String,
    n: usize,
}

#[tokio::test]
async fn paging_is_lossless_and_order_preserving() {
    init_tracing();
    let store = InMemoryStore::new();
    let client = client(&store, ClientConfig { page_size: Some(3), ..ClientConfig::default() });
    let docs = collection("docs");
    seed(&client, &docs, 20).await;

    let before = store.calls();
    let pages = client.read_feed::<Doc>(&docs).collect_pages().await.unwrap();
    assert_eq!(pages.len(), 7);
    assert_eq!(store.calls() - before, 7);
    assert_eq!(pages.iter().map(|p| p.meta().item_count).sum::<usize>(), 20);

    let paged: Vec<Doc> = pages.into_iter().flat_map(|p| p.into_items()).collect();
    let unpaged: Vec<Doc> = client
        .query_with(&docs, Query::read_all(), FeedOptions::new())
        .collect_all()
        .await
        .unwrap();
    assert_eq!(paged, unpaged);
    assert!(paged.windows(2).all(|w| w[0].n < w[1].n));
}

#[tokio::test]
async fn empty_collection_is_one_empty_page() {
    init_tracing();
    let store = InMemoryStore::new();
    let client = client(&store, ClientConfig::default());
    let pages: Vec<_> = client
        .query::<Doc>(&collection("empty"), Query::new("SELECT * FROM c"))
        .into_stream()
        .collect()
        .await;
    assert_eq!(pages.len(), 1);
    let page = pages.into_iter().next().unwrap().unwrap();
    assert!(page.is_empty());
    assert!(page.continuation().is_none());
}

#[tokio::test]
async fn consumer_can_stop_early() {
    init_tracing();
    let store = InMemoryStore::new();
    let client = client(&store, ClientConfig { page_size: Some(5), ..ClientConfig::default() });
    let docs = collection("docs");
    seed(&client, &docs, 30).await;

    let before = store.calls();
    let mut seen = Vec::new();
    let mut feed = client.read_feed::<Doc>(&docs);
    feed.for_each_page(|page| {
        seen.extend(page.into_items());
        if seen.len() >= 10 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .await
    .unwrap();
    assert_eq!(seen.len(), 10);
    assert_eq!(store.calls() - before, 2);
}

#[tokio::test]
async fn independent_feeds_run_concurrently() {
    init_tracing();
    let store = InMemoryStore::new();
    let client = client(&store, ClientConfig { page_size: Some(4), ..ClientConfig::default() });
    let (left, right) = (collection("left"), collection("right"));
    tokio::join!(seed(&client, &left, 9), seed(&client, &right, 6));

    let (a, b) = tokio::join!(
        client.read_feed::<Doc>(&left).collect_all(),
        client.read_feed::<Doc>(&right).collect_all()
    );
    let mut merged = a.unwrap();
    merged.extend(b.unwrap());
    assert_eq!(merged.len(), 15);
}

#[tokio::test]
async fn throttled_pages_are_retried_without_losing_position() {
    init_tracing();
    let store = InMemoryStore::new();
    let client = client(&store, ClientConfig { page_size: Some(4), ..ClientConfig::default() });
    let docs = collection("docs");
    seed(&client, &docs, 8).await;

    let mut feed = client.read_feed::<Doc>(&docs);
    let first = feed.next_page().await.unwrap().unwrap();
    store.throttle_next(2);
    let second = feed.next_page().await.unwrap().unwrap();
    assert!(feed.next_page().await.is_none());
    assert_eq!(first.items()[0].id, "doc-00");
    assert_eq!(second.items()[0].id, "doc-04");
    assert!(second.is_last());
}
