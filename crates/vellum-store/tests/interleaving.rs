//! Store operations overlapping each other against a slow engine.
//!
//! The in-memory engine is given a latency so that reads, deletes and
//! lifecycle changes really interleave. Virtual time keeps the runs exact.

use std::sync::Arc;
use std::time::Duration;
use vellum_core::Envelope;
use vellum_store::{Call, MemoryProvider, ReplicationSession, StoreConfig, StoreManager, SyncState};

const REMOTE: &str = "http://couch.test/alice";

fn manager() -> (Arc<MemoryProvider>, StoreManager<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    let manager = StoreManager::new(provider.clone(), StoreConfig::default());
    (provider, manager)
}

fn resumes(provider: &MemoryProvider) -> usize {
    provider.log().count(|c| matches!(c, Call::Resume))
}

#[tokio::test(start_paused = true)]
async fn test_read_overlapping_remove_is_not_cached() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    let engine = provider.engine("alice").unwrap();
    engine.insert_raw(Envelope::new("a", "GridData", "v1"));
    engine.set_latency(Duration::from_millis(100));

    let reading = async {
        // lands after the cache was cleared, before the engine delete
        tokio::time::sleep(Duration::from_millis(110)).await;
        store.query(None, Some("a")).await.unwrap()
    };
    let (removed, during) = tokio::join!(store.remove("a"), reading);
    removed.unwrap();
    assert_eq!(during.len(), 1);

    assert!(store.cached("a").is_none());
    assert!(store.query(None, Some("a")).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_query_does_not_keep_replication_paused() {
    let (provider, manager) = manager();
    let store = manager.open("alice", Some(REMOTE), false).await.unwrap();
    let engine = provider.engine("alice").unwrap();
    engine.set_latency(Duration::from_millis(500));

    let abandoned =
        tokio::time::timeout(Duration::from_millis(10), store.query(None, Some("grid-1"))).await;
    assert!(abandoned.is_err());
    assert_eq!(store.scheduler().in_flight(), 0);

    engine.set_latency(Duration::ZERO);
    store.query(None, Some("grid-1")).await.unwrap();
    assert_eq!(store.sync_state(), SyncState::Paused);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.sync_state(), SyncState::Syncing);
}

#[tokio::test(start_paused = true)]
async fn test_closed_store_is_not_resumed_by_in_flight_query() {
    let (provider, manager) = manager();
    let store = manager.open("alice", Some(REMOTE), false).await.unwrap();
    let replication = provider.replication("alice").unwrap();
    provider.engine("alice").unwrap().set_latency(Duration::from_millis(200));

    let closing = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.close().await
    };
    let (_, closed) = tokio::join!(store.query(None, Some("grid-1")), closing);
    closed.unwrap();
    assert_eq!(replication.state(), SyncState::Paused);
    let before = resumes(&provider);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(replication.state(), SyncState::Paused);
    assert_eq!(resumes(&provider), before);
    assert!(store.cached("grid-1").is_none());
}
