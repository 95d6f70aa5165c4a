//! Storage-engine and replication-session abstractions.
//!
//! The store never talks to a concrete database. It is handed a
//! [`StorageEngine`] for local (or remote-only) reads and writes, and,
//! when the database replicates, a [`ReplicationSession`] that can be
//! paused and resumed and that reports remote changes.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use vellum_core::{Envelope, Selector};

/// Errors reported by a storage engine or replication session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Another writer advanced the revision first.
    #[error("Document update conflict: {id}")]
    Conflict { id: String },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Engine unreachable: {0}")]
    Unreachable(String),

    /// The engine cannot be used any more; the store must be reopened.
    #[error("Unrecoverable engine failure: {0}")]
    Unrecoverable(String),

    #[error("Engine error: {0}")]
    Other(String),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

/// Document persistence for one database.
#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    /// Name of the database this engine serves.
    fn name(&self) -> &str;

    /// Write an envelope, returning the new revision.
    ///
    /// Fails with [`EngineError::Conflict`] if the envelope's revision is
    /// not the current one.
    async fn put(&self, envelope: &Envelope) -> Result<String, EngineError>;

    /// Return every document matching `selector`.
    async fn find(&self, selector: &Selector) -> Result<Vec<Envelope>, EngineError>;

    /// Bulk read of every record, application documents or not.
    async fn all_docs(&self) -> Result<Vec<serde_json::Value>, EngineError>;

    async fn remove(&self, envelope: &Envelope) -> Result<(), EngineError>;

    /// Delete the whole database.
    async fn destroy(&self) -> Result<(), EngineError>;

    /// Release the engine handle.
    async fn close(&self) -> Result<(), EngineError>;
}

/// Replication state as seen by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No database is open.
    Uninitialized,
    /// Open without a remote replica.
    LocalOnly,
    Syncing,
    Paused,
    /// Replication failed or was never set up successfully.
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::LocalOnly => "local-only",
            SyncState::Syncing => "syncing",
            SyncState::Paused => "paused",
            SyncState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One batch of remote mutations, in the order the engine applied them.
///
/// An id listed in `ids` without a matching entry in `documents` was
/// deleted remotely.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub ids: Vec<String>,
    pub documents: Vec<Envelope>,
}

impl ChangeBatch {
    pub fn new(documents: Vec<Envelope>) -> Self {
        Self {
            ids: documents.iter().map(|d| d.id.clone()).collect(),
            documents,
        }
    }

    pub fn with_deleted(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    /// Ids that were removed rather than updated.
    pub fn deleted_ids(&self) -> impl Iterator<Item = &str> {
        self.ids
            .iter()
            .filter(|id| !self.documents.iter().any(|d| &d.id == *id))
            .map(String::as_str)
    }
}

/// Events emitted by a replication session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplicationEvent {
    Changes(ChangeBatch),
    /// Caught up with the remote replica.
    Idle,
    Failed(String),
}

/// A bidirectional replication between a local database and a remote one.
#[async_trait]
pub trait ReplicationSession: Send + Sync + 'static {
    /// Start (or restart) replication against `remote`.
    async fn start(&self, remote: &str) -> Result<(), EngineError>;

    /// Stop replicating until [`ReplicationSession::resume`] is called.
    async fn cancel(&self);

    async fn resume(&self);

    fn state(&self) -> SyncState;

    /// Whether replication is configured at all (independent of pauses).
    fn is_enabled(&self) -> bool;

    /// Subscribe to remote changes and state notifications.
    fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent>;
}

/// Handles produced when a database is opened.
pub struct Opened<E: StorageEngine> {
    pub engine: Arc<E>,
    pub replication: Option<Arc<dyn ReplicationSession>>,
    /// False when operating directly against the remote database.
    pub using_local: bool,
}

/// Opens and destroys databases by name.
#[async_trait]
pub trait EngineProvider: Send + Sync + 'static {
    type Engine: StorageEngine;

    async fn open(
        &self,
        name: &str,
        remote: Option<&str>,
        only_remote: bool,
    ) -> Result<Opened<Self::Engine>, EngineError>;

    async fn destroy(&self, name: &str) -> Result<(), EngineError>;
}
