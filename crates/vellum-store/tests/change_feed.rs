//! Remote changes arriving on the replication change feed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use vellum_core::{Envelope, ImageAsset};
use vellum_store::codec::seal_document;
use vellum_store::{
    ChangeBatch, ChangeKind, MemoryProvider, PlaintextCodec, QueryResult, StoreConfig,
    StoreEvent, StoreManager,
};

const REMOTE: &str = "http://couch.test/alice";

fn remote_image(id: &str, data: &str, version: &str) -> Envelope {
    let mut image = ImageAsset::new(data);
    image.id = id.to_string();
    image.model_version = version.to_string();
    seal_document(&PlaintextCodec, &image, None).unwrap()
}

async fn next_event(rx: &mut broadcast::Receiver<StoreEvent>) -> StoreEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no change event")
        .expect("event channel closed")
}

async fn open_syncing() -> (Arc<MemoryProvider>, StoreManager<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    let manager = StoreManager::new(provider.clone(), StoreConfig::default());
    manager.open("alice", Some(REMOTE), false).await.unwrap();
    (provider, manager)
}

#[tokio::test]
async fn test_remote_change_updates_cache_before_event() {
    let (provider, manager) = open_syncing().await;
    let store = manager.current().unwrap();
    let mut rx = store.subscribe();

    let replication = provider.replication("alice").unwrap();
    replication.deliver(ChangeBatch::new(vec![remote_image("image-1", "AAA", "1.0.0")]));

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, ChangeKind::Updated);
    assert_eq!(event.ids, vec!["image-1".to_string()]);
    assert!(store.cached("image-1").is_some());
}

#[tokio::test]
async fn test_remote_change_overrides_local_write() {
    let (provider, manager) = open_syncing().await;
    let store = manager.current().unwrap();
    let mut rx = store.subscribe();

    store
        .save(remote_image("image-1", "local", "1.0.0"))
        .await
        .unwrap();
    provider
        .replication("alice")
        .unwrap()
        .deliver(ChangeBatch::new(vec![remote_image("image-1", "remote", "1.0.0")]));
    next_event(&mut rx).await;

    provider.engine("alice").unwrap().set_unreachable(true);
    let image: ImageAsset = store.get("image-1").await.unwrap().unwrap();
    assert_eq!(image.data, "remote");
}

#[tokio::test]
async fn test_remote_delete_invalidates_cache() {
    let (provider, manager) = open_syncing().await;
    let store = manager.current().unwrap();
    let mut rx = store.subscribe();
    store
        .save(remote_image("image-1", "AAA", "1.0.0"))
        .await
        .unwrap();

    provider
        .replication("alice")
        .unwrap()
        .deliver(ChangeBatch::default().with_deleted("image-1"));
    let event = next_event(&mut rx).await;

    assert!(event.documents.is_empty());
    assert!(store.cached("image-1").is_none());
    assert_eq!(
        store.query(None, Some("image-1")).await.unwrap(),
        QueryResult::None
    );
}

#[tokio::test]
async fn test_newer_major_version_is_flagged() {
    let (provider, manager) = open_syncing().await;
    let store = manager.current().unwrap();
    let mut rx = store.subscribe();
    let replication = provider.replication("alice").unwrap();

    replication.deliver(ChangeBatch::new(vec![remote_image("image-1", "AAA", "1.4.0")]));
    assert_eq!(next_event(&mut rx).await.kind, ChangeKind::Updated);

    replication.deliver(ChangeBatch::new(vec![remote_image("image-2", "BBB", "2.0.0")]));
    assert_eq!(next_event(&mut rx).await.kind, ChangeKind::DataModelChanged);
    assert_eq!(manager.markers().user_major_version("alice"), 2);

    // the new version is now the baseline
    replication.deliver(ChangeBatch::new(vec![remote_image("image-3", "CCC", "2.1.0")]));
    assert_eq!(next_event(&mut rx).await.kind, ChangeKind::Updated);
}

#[tokio::test]
async fn test_undecodable_change_is_still_delivered() {
    let (provider, manager) = open_syncing().await;
    let store = manager.current().unwrap();
    let mut rx = store.subscribe();

    let garbage = Envelope::new("image-9", "ImageAsset", "not json");
    provider
        .replication("alice")
        .unwrap()
        .deliver(ChangeBatch::new(vec![garbage]));

    let event = next_event(&mut rx).await;
    assert_eq!(event.kind, ChangeKind::Updated);
    assert!(store.cached("image-9").is_some());
}

#[tokio::test]
async fn test_idle_marks_database_synced() {
    let (provider, manager) = open_syncing().await;
    let store = manager.current().unwrap();
    let mut rx = store.subscribe();
    let replication = provider.replication("alice").unwrap();
    assert!(!manager.markers().is_synced("alice"));

    replication.go_idle();
    // events are handled in order, so once this batch is seen the idle
    // notification has been processed
    replication.deliver(ChangeBatch::default());
    next_event(&mut rx).await;

    assert!(manager.markers().is_synced("alice"));
    assert_eq!(store.scheduler().resume_delay(), Duration::ZERO);
}
