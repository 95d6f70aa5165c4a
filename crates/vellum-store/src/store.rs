//! The store: query/save/remove orchestration over one open database.
//!
//! A [`Store`] owns the read-through [`DocumentCache`], the
//! [`SyncScheduler`] and the task consuming the replication change feed.
//! Every engine call runs with replication paused; every mutation updates or
//! invalidates the cache before the call returns, and every remote batch
//! updates the cache before the matching [`StoreEvent`] is raised.

use crate::codec::{open_any, open_document, seal_document, EnvelopeCodec};
use crate::config::StoreConfig;
use crate::engine::{
    ChangeBatch, EngineError, Opened, ReplicationEvent, StorageEngine, SyncState,
};
use crate::error::{Result, StoreError};
use crate::events::{ChangeKind, StoreEvent};
use crate::markers::LocalMarkers;
use crate::scheduler::SyncScheduler;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vellum_core::{DocumentCache, DocumentKind, Envelope, Metadata, Selector};

/// Result shape of queries: nothing, a single document, or several.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryResult {
    None,
    One(Envelope),
    Many(Vec<Envelope>),
}

impl QueryResult {
    pub fn from_vec(mut docs: Vec<Envelope>) -> Self {
        match docs.len() {
            0 => QueryResult::None,
            1 => QueryResult::One(docs.remove(0)),
            _ => QueryResult::Many(docs),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, QueryResult::None)
    }

    pub fn len(&self) -> usize {
        match self {
            QueryResult::None => 0,
            QueryResult::One(_) => 1,
            QueryResult::Many(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<&Envelope> {
        match self {
            QueryResult::None => None,
            QueryResult::One(doc) => Some(doc),
            QueryResult::Many(docs) => docs.first(),
        }
    }

    pub fn into_vec(self) -> Vec<Envelope> {
        match self {
            QueryResult::None => Vec::new(),
            QueryResult::One(doc) => vec![doc],
            QueryResult::Many(docs) => docs,
        }
    }
}

/// What a successful `save` actually did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The engine stored the envelope under `revision`.
    Written { revision: String },
    /// Another writer advanced the revision first. The remote value is kept
    /// and the local change is discarded without retry.
    ConflictIgnored,
    /// Nothing to write; the stored value already had this content.
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Failed(String),
    Closed,
}

/// One open database.
pub struct Store<E: StorageEngine> {
    name: String,
    engine: Arc<E>,
    using_local: bool,
    codec: Arc<dyn EnvelopeCodec>,
    cache: Arc<RwLock<DocumentCache>>,
    scheduler: Arc<SyncScheduler>,
    markers: Arc<LocalMarkers>,
    lifecycle: Mutex<Lifecycle>,
    event_tx: broadcast::Sender<StoreEvent>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) dedup_lock: tokio::sync::Mutex<()>,
}

impl<E: StorageEngine> Store<E> {
    /// Wrap freshly opened engine handles. Must be called inside a Tokio
    /// runtime: the change feed is consumed by a spawned task.
    pub fn new(
        name: impl Into<String>,
        opened: Opened<E>,
        codec: Arc<dyn EnvelopeCodec>,
        markers: Arc<LocalMarkers>,
        config: &StoreConfig,
    ) -> Self {
        let name = name.into();
        let Opened {
            engine,
            replication,
            using_local,
        } = opened;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let cache = Arc::new(RwLock::new(DocumentCache::new()));

        let feed_task = replication.as_ref().map(|session| {
            let feed = ChangeFeed {
                database: name.clone(),
                cache: cache.clone(),
                codec: codec.clone(),
                markers: markers.clone(),
                event_tx: event_tx.clone(),
            };
            tokio::spawn(feed.run(session.subscribe()))
        });

        let scheduler = Arc::new(SyncScheduler::new(
            name.clone(),
            replication,
            using_local,
            markers.clone(),
            config,
        ));

        info!(database = %name, using_local, "store opened");
        Self {
            name,
            engine,
            using_local,
            codec,
            cache,
            scheduler,
            markers,
            lifecycle: Mutex::new(Lifecycle::Open),
            event_tx,
            feed_task: Mutex::new(feed_task),
            dedup_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn codec(&self) -> &dyn EnvelopeCodec {
        self.codec.as_ref()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn markers(&self) -> &Arc<LocalMarkers> {
        &self.markers
    }

    /// False when operating directly against a remote database.
    pub fn is_using_local(&self) -> bool {
        self.using_local
    }

    pub fn is_open(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Open
    }

    pub fn sync_state(&self) -> SyncState {
        match &*self.lifecycle.lock() {
            Lifecycle::Open => self.scheduler.sync_state(),
            Lifecycle::Failed(_) => SyncState::Failed,
            Lifecycle::Closed => SyncState::Uninitialized,
        }
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.is_open() && self.scheduler.is_sync_enabled()
    }

    /// Receive remote change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    /// The cached envelope for `id`, without touching the engine.
    pub fn cached(&self, id: &str) -> Option<Envelope> {
        self.cache.read().get(id).cloned()
    }

    /// Start replicating against `remote`.
    pub async fn start_sync(&self, remote: &str) -> Result<()> {
        self.ensure_open()?;
        let session = self.scheduler.session().ok_or_else(|| {
            StoreError::Rejected(format!("store `{}` has no replication session", self.name))
        })?;
        session
            .start(remote)
            .await
            .map_err(|e| StoreError::persistence("start sync", e))
    }

    pub async fn cancel_sync(&self) {
        self.scheduler.cancel_sync().await;
    }

    pub async fn resume_sync(&self) {
        self.scheduler.resume_sync().await;
    }

    /// Find documents by model name and/or id.
    ///
    /// A lookup by id that hits the cache returns without engine I/O and
    /// without pausing replication.
    pub async fn query(&self, model_name: Option<&str>, id: Option<&str>) -> Result<QueryResult> {
        self.ensure_open()?;
        if let Some(id) = id {
            if let Some(hit) = self.cache.read().get(id).cloned() {
                debug!(id, "using cache");
                if model_name.map_or(false, |m| m != hit.model_name) {
                    return Ok(QueryResult::None);
                }
                return Ok(QueryResult::One(hit));
            }
        }

        let selector = Selector::new(model_name, id);
        if selector.is_empty() {
            return Err(StoreError::Query(
                "neither a model name nor an id was given".to_string(),
            ));
        }

        let stamp = id.map(|id| self.cache.read().stamp(id));
        let docs = self
            .scheduler
            .around(self.engine.find(&selector))
            .await
            .map_err(|e| self.engine_failure("query", e))?;
        debug!(?model_name, ?id, found = docs.len(), "query finished");

        let result = QueryResult::from_vec(docs);
        if let (QueryResult::One(doc), Some(id), Some(stamp)) = (&result, id, stamp) {
            self.cache.write().set_if_unchanged(id, doc.clone(), stamp);
        }
        Ok(result)
    }

    /// Every application document in the database.
    pub async fn all(&self) -> Result<QueryResult> {
        self.ensure_open()?;
        let rows = self
            .scheduler
            .around(self.engine.all_docs())
            .await
            .map_err(|e| self.engine_failure("all", e))?;
        let docs: Vec<Envelope> = rows
            .into_iter()
            .filter_map(|row| serde_json::from_value::<Envelope>(row).ok())
            .filter(Envelope::is_application_document)
            .collect();
        debug!(found = docs.len(), "listed all documents");
        Ok(QueryResult::from_vec(docs))
    }

    /// Write an envelope.
    ///
    /// Malformed envelopes are rejected before any engine call. The envelope
    /// is cached before the write and re-cached with the engine's revision
    /// afterwards; on failure the optimistic entry is dropped. A conflict is
    /// not an error: see [`SaveOutcome::ConflictIgnored`].
    pub async fn save(&self, envelope: Envelope) -> Result<SaveOutcome> {
        self.ensure_open()?;
        envelope.validate()?;
        debug!(model = %envelope.model_name, id = %envelope.id, "saving");

        self.scheduler
            .around(async {
                let id = envelope.id.clone();
                let stamp = {
                    let mut cache = self.cache.write();
                    cache.set(id.clone(), envelope.clone());
                    cache.stamp(&id)
                };
                match self.engine.put(&envelope).await {
                    Ok(revision) => {
                        let mut stored = envelope;
                        stored.revision = Some(revision.clone());
                        self.cache.write().set_if_unchanged(&id, stored, stamp);
                        Ok(SaveOutcome::Written { revision })
                    }
                    Err(e) if e.is_conflict() => {
                        self.cache.write().clear(&id);
                        warn!(%id, "conflict with remote version, keeping remote value");
                        Ok(SaveOutcome::ConflictIgnored)
                    }
                    Err(e) => {
                        self.cache.write().clear(&id);
                        error!(%id, error = %e, "save failed");
                        Err(self.engine_failure("save", e))
                    }
                }
            })
            .await
    }

    /// Delete the document with application id `id`.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        self.scheduler
            .around(async {
                let found = self
                    .engine
                    .find(&Selector::by_id(id))
                    .await
                    .map_err(|e| self.engine_failure("remove", e))?;
                if found.is_empty() {
                    return Err(StoreError::NotFound(id.to_string()));
                }
                self.cache.write().clear(id);
                let removed: std::result::Result<(), EngineError> = async {
                    for doc in &found {
                        self.engine.remove(doc).await?;
                    }
                    Ok(())
                }
                .await;
                // a read overlapping the delete may have cached the old value
                self.cache.write().clear(id);
                removed.map_err(|e| self.engine_failure("remove", e))?;
                debug!(id, "deleted document");
                Ok(())
            })
            .await
    }

    /// Decode the document `id` of kind `K`.
    pub async fn get<K: DocumentKind>(&self, id: &str) -> Result<Option<K>> {
        match self.query(Some(K::MODEL_NAME), Some(id)).await?.first() {
            Some(envelope) => Ok(Some(open_document(self.codec(), envelope)?)),
            None => Ok(None),
        }
    }

    /// Decode every document of kind `K`.
    pub async fn list<K: DocumentKind>(&self) -> Result<Vec<K>> {
        self.query(Some(K::MODEL_NAME), None)
            .await?
            .into_vec()
            .iter()
            .map(|envelope| open_document(self.codec(), envelope))
            .collect()
    }

    /// Seal and save a typed document, keeping the engine identity and
    /// revision of its current version.
    pub async fn save_document<K: DocumentKind>(&self, doc: &K) -> Result<SaveOutcome> {
        let previous = if doc.id().is_empty() {
            None
        } else {
            self.query(None, Some(doc.id())).await?.first().cloned()
        };
        let envelope = seal_document(self.codec(), doc, previous.as_ref())?;
        self.save(envelope).await
    }

    /// The singleton metadata document, or a fresh unsaved one if absent.
    pub async fn metadata(&self) -> Result<Metadata> {
        match self.query(Some(Metadata::MODEL_NAME), None).await? {
            QueryResult::None => Ok(Metadata::default()),
            QueryResult::One(envelope) => open_document(self.codec(), &envelope),
            QueryResult::Many(envelopes) => {
                warn!(count = envelopes.len(), "several metadata documents, using the first");
                open_document(self.codec(), &envelopes[0])
            }
        }
    }

    /// Save `metadata` under the id of the existing instance, if any.
    ///
    /// The `hashCodes` index belongs to content-addressed saves: the stored
    /// index is kept whatever the caller's copy holds. Serialized with
    /// [`Store::save_content_addressed`] so the singleton is never created
    /// twice.
    pub async fn save_metadata(&self, mut metadata: Metadata) -> Result<SaveOutcome> {
        let _index = self.dedup_lock.lock().await;
        let existing = self.query(Some(Metadata::MODEL_NAME), None).await?;
        if let Some(envelope) = existing.first() {
            let current: Metadata = open_document(self.codec(), envelope)?;
            metadata.id = current.id.clone();
            metadata.hash_codes = current.hash_codes.clone();
            if current.same_content(&metadata) {
                return Ok(SaveOutcome::Unchanged);
            }
        }
        self.save_document(&metadata).await
    }

    /// Destroy the whole database. The store stays open on the empty database.
    pub async fn destroy(&self) -> Result<()> {
        self.ensure_open()?;
        self.scheduler.cancel_sync().await;
        self.cache.write().clear_all();
        self.engine
            .destroy()
            .await
            .map_err(|e| self.engine_failure("destroy", e))?;
        warn!(database = %self.name, "database destroyed");
        Ok(())
    }

    /// Pause replication, stop the change feed, drop the cache and release
    /// the engine. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Closed {
                return Ok(());
            }
            *lifecycle = Lifecycle::Closed;
        }
        self.scheduler.close().await;
        if let Some(task) = self.feed_task.lock().take() {
            task.abort();
        }
        self.cache.write().clear_all();
        info!(database = %self.name, "store closed");
        self.engine
            .close()
            .await
            .map_err(|e| StoreError::persistence("close", e))
    }

    fn ensure_open(&self) -> Result<()> {
        match &*self.lifecycle.lock() {
            Lifecycle::Open => Ok(()),
            Lifecycle::Failed(reason) => Err(StoreError::Failed {
                name: self.name.clone(),
                reason: reason.clone(),
            }),
            Lifecycle::Closed => Err(StoreError::Closed(self.name.clone())),
        }
    }

    /// Convert an engine error, moving the store to FAILED if it is fatal.
    fn engine_failure(&self, op: &'static str, err: EngineError) -> StoreError {
        if let EngineError::Unrecoverable(reason) = &err {
            error!(database = %self.name, %reason, "engine failed, store unusable");
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Open {
                *lifecycle = Lifecycle::Failed(reason.clone());
            }
        }
        StoreError::persistence(op, err)
    }
}

impl<E: StorageEngine> Drop for Store<E> {
    fn drop(&mut self) {
        if let Some(task) = self.feed_task.lock().take() {
            task.abort();
        }
    }
}

/// State moved into the change-feed task.
struct ChangeFeed {
    database: String,
    cache: Arc<RwLock<DocumentCache>>,
    codec: Arc<dyn EnvelopeCodec>,
    markers: Arc<LocalMarkers>,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl ChangeFeed {
    async fn run(self, mut rx: broadcast::Receiver<ReplicationEvent>) {
        loop {
            match rx.recv().await {
                Ok(ReplicationEvent::Changes(batch)) => self.apply(batch),
                Ok(ReplicationEvent::Idle) => {
                    debug!(database = %self.database, "replica caught up");
                    self.markers.mark_synced(&self.database);
                }
                Ok(ReplicationEvent::Failed(reason)) => {
                    error!(database = %self.database, %reason, "replication failed");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(database = %self.database, missed, "change feed lagged, invalidating cache");
                    self.cache.write().clear_all();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn apply(&self, batch: ChangeBatch) {
        {
            let mut cache = self.cache.write();
            for id in batch.deleted_ids() {
                cache.clear(id);
            }
            for doc in &batch.documents {
                cache.set(doc.id.clone(), doc.clone());
            }
        }

        let before = self.markers.user_major_version(&self.database);
        for envelope in &batch.documents {
            match open_any(self.codec.as_ref(), envelope) {
                Ok(doc) => {
                    if let Some(version) = doc.model_version() {
                        self.markers.record_model_version(&self.database, version);
                    }
                }
                Err(e) => {
                    warn!(id = %envelope.id, error = %e, "cannot read version of remote change")
                }
            }
        }
        let kind = if before == self.markers.user_major_version(&self.database) {
            ChangeKind::Updated
        } else {
            warn!(database = %self.database, "remote data model version changed");
            ChangeKind::DataModelChanged
        };

        debug!(database = %self.database, changes = batch.ids.len(), ?kind, "remote changes applied");
        let _ = self.event_tx.send(StoreEvent {
            kind,
            ids: batch.ids,
            documents: batch.documents,
        });
    }
}
