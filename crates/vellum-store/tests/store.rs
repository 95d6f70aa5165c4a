//! Integration tests for the store's query/save/remove orchestration.
//!
//! Tests cover:
//! - cache coherence after local writes
//! - read-through population of the cache
//! - conflict absorption and the validation gate
//! - replication paused around engine calls
//! - failure and close lifecycle

use std::sync::Arc;
use std::time::Duration;
use vellum_core::{DocumentKind, Envelope, ImageAsset, Metadata};
use vellum_store::{
    Call, EngineError, MemoryProvider, QueryResult, SaveOutcome, StoreConfig, StoreError,
    StoreManager, SyncState,
};

const REMOTE: &str = "http://couch.test/alice";

fn manager() -> (Arc<MemoryProvider>, StoreManager<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    let manager = StoreManager::new(provider.clone(), StoreConfig::default());
    (provider, manager)
}

#[tokio::test]
async fn test_saved_document_is_served_from_cache() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();

    let outcome = store
        .save(Envelope::new("image-1", "ImageAsset", "v1"))
        .await
        .unwrap();
    assert!(matches!(outcome, SaveOutcome::Written { .. }));

    let engine = provider.engine("alice").unwrap();
    engine.set_unreachable(true);
    provider.log().clear();

    let QueryResult::One(doc) = store.query(None, Some("image-1")).await.unwrap() else {
        panic!("expected a single cached document");
    };
    assert_eq!(doc.encrypted_payload, "v1");
    assert!(doc.revision.is_some());
    assert!(provider.log().calls().is_empty());
}

#[tokio::test]
async fn test_query_populates_cache() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    let engine = provider.engine("alice").unwrap();
    engine.insert_raw(Envelope::new("grid-1", "GridData", "payload"));

    let first = store.query(Some("GridData"), Some("grid-1")).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(provider.log().count(|c| matches!(c, Call::Find(_))), 1);

    engine.set_unreachable(true);
    let second = store.query(Some("GridData"), Some("grid-1")).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(provider.log().count(|c| matches!(c, Call::Find(_))), 1);
}

#[tokio::test]
async fn test_cached_document_of_other_kind_is_not_returned() {
    let (_provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    store
        .save(Envelope::new("image-1", "ImageAsset", "v1"))
        .await
        .unwrap();

    let result = store.query(Some("MetaData"), Some("image-1")).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_query_shapes() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    let engine = provider.engine("alice").unwrap();

    assert_eq!(
        store.query(Some("ImageAsset"), None).await.unwrap(),
        QueryResult::None
    );

    engine.insert_raw(Envelope::new("image-1", "ImageAsset", "a"));
    assert!(matches!(
        store.query(Some("ImageAsset"), None).await.unwrap(),
        QueryResult::One(_)
    ));

    engine.insert_raw(Envelope::new("image-2", "ImageAsset", "b"));
    let QueryResult::Many(docs) = store.query(Some("ImageAsset"), None).await.unwrap() else {
        panic!("expected several documents");
    };
    assert_eq!(docs.len(), 2);
}

#[tokio::test]
async fn test_query_without_criteria_is_rejected() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    provider.log().clear();

    let err = store.query(None, None).await.unwrap_err();
    assert!(matches!(err, StoreError::Query(_)));
    assert!(provider.log().calls().is_empty());
}

#[tokio::test]
async fn test_all_skips_foreign_records() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    assert!(store.all().await.unwrap().is_none());

    let engine = provider.engine("alice").unwrap();
    engine.insert_raw(Envelope::new("image-1", "ImageAsset", "a"));
    engine.insert_raw(Envelope::new("meta-data-1", "MetaData", "{}"));
    engine.insert_foreign(serde_json::json!({ "_id": "_design/by-model", "views": {} }));

    let all = store.all().await.unwrap().into_vec();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(Envelope::is_application_document));
}

#[tokio::test]
async fn test_conflict_is_absorbed_without_retry() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    let engine = provider.engine("alice").unwrap();
    engine.insert_raw(Envelope::new("grid-1", "GridData", "remote"));
    provider.log().clear();

    // no revision: another writer already advanced it
    let outcome = store
        .save(Envelope::new("grid-1", "GridData", "local"))
        .await
        .unwrap();

    assert_eq!(outcome, SaveOutcome::ConflictIgnored);
    assert_eq!(provider.log().count(|c| matches!(c, Call::Put { .. })), 1);
    assert!(store.cached("grid-1").is_none());

    let QueryResult::One(doc) = store.query(None, Some("grid-1")).await.unwrap() else {
        panic!("expected the remote document");
    };
    assert_eq!(doc.encrypted_payload, "remote");
}

#[tokio::test]
async fn test_update_with_current_revision_is_written() {
    let (_provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    store
        .save(Envelope::new("grid-1", "GridData", "v1"))
        .await
        .unwrap();

    let QueryResult::One(mut doc) = store.query(None, Some("grid-1")).await.unwrap() else {
        panic!("expected the saved document");
    };
    doc.encrypted_payload = "v2".into();
    let outcome = store.save(doc).await.unwrap();
    let SaveOutcome::Written { revision } = outcome else {
        panic!("expected a write, got {:?}", outcome);
    };
    assert!(revision.starts_with("2-"));
    assert_eq!(store.cached("grid-1").unwrap().encrypted_payload, "v2");
}

#[tokio::test]
async fn test_invalid_envelope_never_reaches_engine() {
    let (provider, manager) = manager();
    let store = manager.open("alice", Some(REMOTE), false).await.unwrap();
    provider.log().clear();

    let err = store
        .save(Envelope::new("image-1", "ImageAsset", ""))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Validation(_)));
    assert!(provider.log().calls().is_empty());
    assert!(store.cached("image-1").is_none());
}

#[tokio::test]
async fn test_failed_write_drops_optimistic_entry() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    provider
        .engine("alice")
        .unwrap()
        .fail_next_put(EngineError::Other("disk full".into()));

    let err = store
        .save(Envelope::new("image-1", "ImageAsset", "v1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::Persistence {
            op: "save",
            source: EngineError::Other(_)
        }
    ));
    assert!(store.cached("image-1").is_none());
    assert!(store.is_open());
}

#[tokio::test]
async fn test_remove_invalidates_cache() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    store
        .save(Envelope::new("image-1", "ImageAsset", "v1"))
        .await
        .unwrap();

    store.remove("image-1").await.unwrap();
    assert!(store.cached("image-1").is_none());
    assert!(provider.engine("alice").unwrap().is_empty());
    assert!(store.query(None, Some("image-1")).await.unwrap().is_none());

    let err = store.remove("image-1").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_query_pauses_sync_before_engine_and_resumes_after() {
    let (provider, manager) = manager();
    let store = manager.open("alice", Some(REMOTE), false).await.unwrap();
    assert_eq!(store.sync_state(), SyncState::Syncing);
    provider.log().clear();

    store.query(Some("ImageAsset"), Some("image-1")).await.unwrap();

    let log = provider.log();
    let cancel = log.position(|c| matches!(c, Call::Cancel)).unwrap();
    let find = log.position(|c| matches!(c, Call::Find(_))).unwrap();
    assert!(cancel < find);
    assert_eq!(log.count(|c| matches!(c, Call::Resume)), 0);
    assert_eq!(store.sync_state(), SyncState::Paused);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(log.count(|c| matches!(c, Call::Resume)), 1);
    assert_eq!(store.sync_state(), SyncState::Syncing);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_does_not_pause_sync() {
    let (provider, manager) = manager();
    let store = manager.open("alice", Some(REMOTE), false).await.unwrap();
    store
        .save(Envelope::new("image-1", "ImageAsset", "v1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    provider.log().clear();

    store.query(None, Some("image-1")).await.unwrap();
    assert!(provider.log().calls().is_empty());
    assert_eq!(store.sync_state(), SyncState::Syncing);
}

#[tokio::test(start_paused = true)]
async fn test_save_failure_still_resumes_sync() {
    let (provider, manager) = manager();
    let store = manager.open("alice", Some(REMOTE), false).await.unwrap();
    provider
        .engine("alice")
        .unwrap()
        .fail_next_put(EngineError::Unreachable("offline".into()));

    assert!(store
        .save(Envelope::new("image-1", "ImageAsset", "v1"))
        .await
        .is_err());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.sync_state(), SyncState::Syncing);
}

#[tokio::test]
async fn test_unrecoverable_error_fails_store() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    provider
        .engine("alice")
        .unwrap()
        .fail_next_put(EngineError::Unrecoverable("corrupted".into()));

    assert!(store
        .save(Envelope::new("image-1", "ImageAsset", "v1"))
        .await
        .is_err());
    assert_eq!(store.sync_state(), SyncState::Failed);

    let err = store.query(None, Some("image-1")).await.unwrap_err();
    assert!(matches!(err, StoreError::Failed { .. }));
}

#[tokio::test]
async fn test_closed_store_rejects_operations() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    store
        .save(Envelope::new("image-1", "ImageAsset", "v1"))
        .await
        .unwrap();

    store.close().await.unwrap();
    store.close().await.unwrap();
    assert!(store.cached("image-1").is_none());
    assert_eq!(provider.log().count(|c| matches!(c, Call::Close)), 1);

    let err = store.query(None, Some("image-1")).await.unwrap_err();
    assert!(matches!(err, StoreError::Closed(_)));
}

#[tokio::test]
async fn test_typed_documents_round_trip() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();
    provider
        .engine("alice")
        .unwrap()
        .insert_raw(Envelope::new("grid-1", "GridData", "{}"));

    let mut image = ImageAsset::new("data:image/png;base64,AAA");
    image.id = "image-a".into();
    image.author = Some("arasaac".into());
    store.save_document(&image).await.unwrap();

    image.author = None;
    let outcome = store.save_document(&image).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Written { revision } if revision.starts_with("2-")));

    let images: Vec<ImageAsset> = store.list().await.unwrap();
    assert_eq!(images, vec![image.clone()]);
    assert_eq!(store.get::<ImageAsset>("image-a").await.unwrap(), Some(image));
    assert!(store.get::<ImageAsset>("grid-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_metadata_is_saved_once_and_skipped_when_unchanged() {
    let (provider, manager) = manager();
    let store = manager.open("alice", None, false).await.unwrap();

    // absent: a fresh unsaved instance
    let fresh = store.metadata().await.unwrap();
    assert!(fresh.id.starts_with("meta-data-"));
    assert_eq!(provider.engine("alice").unwrap().count_model(Metadata::MODEL_NAME), 0);

    assert!(matches!(
        store.save_metadata(fresh.clone()).await.unwrap(),
        SaveOutcome::Written { .. }
    ));
    // same content under another id is not written again
    assert_eq!(
        store.save_metadata(Metadata::default()).await.unwrap(),
        SaveOutcome::Unchanged
    );

    let mut changed = Metadata::default();
    changed.last_opened_grid_id = Some("grid-1".into());
    assert!(matches!(
        store.save_metadata(changed).await.unwrap(),
        SaveOutcome::Written { .. }
    ));

    let engine = provider.engine("alice").unwrap();
    assert_eq!(engine.count_model(Metadata::MODEL_NAME), 1);
    let stored = store.metadata().await.unwrap();
    assert_eq!(stored.id, fresh.id);
    assert_eq!(stored.last_opened_grid_id.as_deref(), Some("grid-1"));
}
