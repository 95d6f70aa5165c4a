//! In-memory engine, replication session and provider.
//!
//! Used by tests, the CLI scenarios and the burst benchmark. Every call that
//! reaches the engine or the session is appended to a shared [`CallLog`], so
//! tests can assert on ordering (pause before read, no engine call on a cache
//! hit, exactly one write per distinct payload, ...).
//!
//! [`MemoryEngine::set_latency`] makes every engine call yield for a while.
//! Reads observe the state at call time; writes take effect once the
//! latency has elapsed. That is enough to reproduce the interleavings the
//! store has to survive (a read overtaking a delete, two index updates racing).

use crate::engine::{
    ChangeBatch, EngineError, EngineProvider, Opened, ReplicationEvent, ReplicationSession,
    StorageEngine, SyncState,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use ulid::Ulid;
use vellum_core::{Envelope, Selector};

/// A recorded engine or replication call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Put { id: String, model_name: String },
    Find(Selector),
    AllDocs,
    Remove { id: String },
    Destroy,
    Close,
    Start { remote: String },
    Cancel,
    Resume,
}

impl Call {
    /// Whether this call touched the storage engine (as opposed to replication).
    pub fn is_engine_call(&self) -> bool {
        matches!(
            self,
            Call::Put { .. } | Call::Find(_) | Call::AllDocs | Call::Remove { .. } | Call::Destroy
        )
    }
}

/// Shared, ordered record of calls.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Index of the first call matching `pred`.
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.lock().iter().position(|c| pred(c))
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    next_put: Option<EngineError>,
}

/// A storage engine holding documents in a map keyed by internal id.
pub struct MemoryEngine {
    name: String,
    docs: RwLock<BTreeMap<String, Envelope>>,
    foreign: RwLock<Vec<serde_json::Value>>,
    faults: Mutex<Faults>,
    latency: Mutex<Duration>,
    closed: AtomicBool,
    log: CallLog,
}

impl MemoryEngine {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(BTreeMap::new()),
            foreign: RwLock::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            latency: Mutex::new(Duration::ZERO),
            closed: AtomicBool::new(false),
            log,
        }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Make every following call fail as if the network were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.lock().unreachable = unreachable;
    }

    /// Fail the next `put` with `error`.
    pub fn fail_next_put(&self, error: EngineError) {
        self.faults.lock().next_put = Some(error);
    }

    /// Delay every following engine call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Answer the next `put` as if another writer had won the revision race.
    pub fn conflict_next_put(&self) {
        self.faults.lock().next_put = Some(EngineError::Conflict {
            id: String::new(),
        });
    }

    /// Store an envelope without recording a call, assigning a revision.
    pub fn insert_raw(&self, mut envelope: Envelope) -> Envelope {
        let mut docs = self.docs.write();
        let previous = docs.get(&envelope.internal_id).and_then(|e| e.revision.clone());
        envelope.revision = Some(next_revision(previous.as_deref()));
        docs.insert(envelope.internal_id.clone(), envelope.clone());
        envelope
    }

    /// Store a record that is not an application document.
    pub fn insert_foreign(&self, record: serde_json::Value) {
        self.foreign.write().push(record);
    }

    pub fn delete_raw(&self, id: &str) -> Option<Envelope> {
        let mut docs = self.docs.write();
        let key = docs.iter().find(|(_, e)| e.id == id).map(|(k, _)| k.clone())?;
        docs.remove(&key)
    }

    /// Current envelope for application id `id`, without recording a call.
    pub fn peek(&self, id: &str) -> Option<Envelope> {
        self.docs.read().values().find(|e| e.id == id).cloned()
    }

    pub fn count_model(&self, model_name: &str) -> usize {
        self.docs
            .read()
            .values()
            .filter(|e| e.model_name == model_name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    async fn wait(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_available(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Other(format!("database `{}` is closed", self.name)));
        }
        if self.faults.lock().unreachable {
            return Err(EngineError::Unreachable(self.name.clone()));
        }
        Ok(())
    }
}

/// CouchDB-style `<generation>-<token>` revision following `previous`.
fn next_revision(previous: Option<&str>) -> String {
    let generation = previous
        .and_then(|rev| rev.split('-').next())
        .and_then(|g| g.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Ulid::new().to_string().to_lowercase())
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, envelope: &Envelope) -> Result<String, EngineError> {
        self.log.record(Call::Put {
            id: envelope.id.clone(),
            model_name: envelope.model_name.clone(),
        });
        self.check_available()?;
        if let Some(mut err) = self.faults.lock().next_put.take() {
            if let EngineError::Conflict { id } = &mut err {
                *id = envelope.id.clone();
            }
            return Err(err);
        }
        self.wait().await;

        let mut docs = self.docs.write();
        if let Some(existing) = docs.get(&envelope.internal_id) {
            if existing.revision != envelope.revision {
                return Err(EngineError::Conflict {
                    id: envelope.id.clone(),
                });
            }
        }
        let revision = next_revision(envelope.revision.as_deref());
        let mut stored = envelope.clone();
        stored.revision = Some(revision.clone());
        docs.insert(stored.internal_id.clone(), stored);
        Ok(revision)
    }

    async fn find(&self, selector: &Selector) -> Result<Vec<Envelope>, EngineError> {
        self.log.record(Call::Find(selector.clone()));
        self.check_available()?;
        let found: Vec<Envelope> = self
            .docs
            .read()
            .values()
            .filter(|e| selector.matches(e))
            .cloned()
            .collect();
        self.wait().await;
        Ok(found)
    }

    async fn all_docs(&self) -> Result<Vec<serde_json::Value>, EngineError> {
        self.log.record(Call::AllDocs);
        self.check_available()?;
        let mut rows = self
            .docs
            .read()
            .values()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Other(e.to_string()))?;
        rows.extend(self.foreign.read().iter().cloned());
        self.wait().await;
        Ok(rows)
    }

    async fn remove(&self, envelope: &Envelope) -> Result<(), EngineError> {
        self.log.record(Call::Remove {
            id: envelope.id.clone(),
        });
        self.check_available()?;
        self.wait().await;
        match self.docs.write().remove(&envelope.internal_id) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(envelope.id.clone())),
        }
    }

    async fn destroy(&self) -> Result<(), EngineError> {
        self.log.record(Call::Destroy);
        self.check_available()?;
        self.wait().await;
        self.docs.write().clear();
        self.foreign.write().clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.log.record(Call::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A replication session driven by the test or demo.
///
/// Remote changes are injected with [`MemoryReplication::deliver`], which
/// applies them to the attached local engine and then publishes them on the
/// change feed, the way a real replicator writes before it notifies.
pub struct MemoryReplication {
    database: String,
    local: Option<Arc<MemoryEngine>>,
    remote: Mutex<Option<String>>,
    state: Mutex<SyncState>,
    event_tx: broadcast::Sender<ReplicationEvent>,
    log: CallLog,
}

impl MemoryReplication {
    pub fn new(database: impl Into<String>, log: CallLog) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            database: database.into(),
            local: None,
            remote: Mutex::new(None),
            state: Mutex::new(SyncState::LocalOnly),
            event_tx,
            log,
        }
    }

    /// A session replicating into `engine`.
    pub fn for_engine(engine: Arc<MemoryEngine>) -> Self {
        let mut replication = Self::new(engine.name().to_string(), engine.log().clone());
        replication.local = Some(engine);
        replication
    }

    pub fn remote(&self) -> Option<String> {
        self.remote.lock().clone()
    }

    /// Apply a remote batch locally and publish it. Returns the number of
    /// subscribers that will see it.
    pub fn deliver(&self, batch: ChangeBatch) -> usize {
        let mut batch = batch;
        if let Some(local) = &self.local {
            for id in batch.deleted_ids().map(str::to_string).collect::<Vec<_>>() {
                local.delete_raw(&id);
            }
            for doc in batch.documents.iter_mut() {
                *doc = local.insert_raw(doc.clone());
            }
        }
        debug!(database = %self.database, changes = batch.ids.len(), "delivering remote changes");
        self.event_tx
            .send(ReplicationEvent::Changes(batch))
            .unwrap_or(0)
    }

    /// Report that the local replica caught up with the remote.
    pub fn go_idle(&self) {
        let _ = self.event_tx.send(ReplicationEvent::Idle);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        *self.state.lock() = SyncState::Failed;
        let _ = self.event_tx.send(ReplicationEvent::Failed(reason));
    }
}

#[async_trait]
impl ReplicationSession for MemoryReplication {
    async fn start(&self, remote: &str) -> Result<(), EngineError> {
        self.log.record(Call::Start {
            remote: remote.to_string(),
        });
        if remote.is_empty() {
            return Err(EngineError::Other("remote address is empty".to_string()));
        }
        *self.remote.lock() = Some(remote.to_string());
        *self.state.lock() = SyncState::Syncing;
        Ok(())
    }

    async fn cancel(&self) {
        self.log.record(Call::Cancel);
        let mut state = self.state.lock();
        if *state == SyncState::Syncing {
            *state = SyncState::Paused;
        }
    }

    async fn resume(&self) {
        self.log.record(Call::Resume);
        if self.remote.lock().is_none() {
            return;
        }
        let mut state = self.state.lock();
        if *state == SyncState::Paused {
            *state = SyncState::Syncing;
        }
    }

    fn state(&self) -> SyncState {
        *self.state.lock()
    }

    fn is_enabled(&self) -> bool {
        self.remote.lock().is_some() && *self.state.lock() != SyncState::Failed
    }

    fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.event_tx.subscribe()
    }
}

/// Opens [`MemoryEngine`]s by name; reopening a name returns the same data.
#[derive(Default)]
pub struct MemoryProvider {
    databases: Mutex<HashMap<String, Arc<MemoryEngine>>>,
    remotes: Mutex<HashMap<String, Arc<MemoryEngine>>>,
    replications: Mutex<HashMap<String, Arc<MemoryReplication>>>,
    log: CallLog,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// The local engine opened under `name`, if any.
    pub fn engine(&self, name: &str) -> Option<Arc<MemoryEngine>> {
        self.databases.lock().get(name).cloned()
    }

    /// The remote database at `address`, if it has been opened remote-only.
    pub fn remote_engine(&self, address: &str) -> Option<Arc<MemoryEngine>> {
        self.remotes.lock().get(address).cloned()
    }

    /// The most recent replication session created for `name`.
    pub fn replication(&self, name: &str) -> Option<Arc<MemoryReplication>> {
        self.replications.lock().get(name).cloned()
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl EngineProvider for MemoryProvider {
    type Engine = MemoryEngine;

    async fn open(
        &self,
        name: &str,
        remote: Option<&str>,
        only_remote: bool,
    ) -> Result<Opened<MemoryEngine>, EngineError> {
        if only_remote {
            let address = remote
                .ok_or_else(|| EngineError::Other("remote-only store needs an address".into()))?;
            let engine = self
                .remotes
                .lock()
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(MemoryEngine::new(name, self.log.clone())))
                .clone();
            engine.reopen();
            return Ok(Opened {
                engine,
                replication: None,
                using_local: false,
            });
        }

        let engine = self
            .databases
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryEngine::new(name, self.log.clone())))
            .clone();
        engine.reopen();

        let replication = Arc::new(MemoryReplication::for_engine(engine.clone()));
        if let Some(address) = remote {
            replication.start(address).await?;
        }
        self.replications
            .lock()
            .insert(name.to_string(), replication.clone());

        Ok(Opened {
            engine,
            replication: Some(replication as Arc<dyn ReplicationSession>),
            using_local: true,
        })
    }

    async fn destroy(&self, name: &str) -> Result<(), EngineError> {
        let engine = self.databases.lock().remove(name);
        self.replications.lock().remove(name);
        if let Some(engine) = engine {
            engine.reopen();
            engine.destroy().await?;
        }
        Ok(())
    }
}
