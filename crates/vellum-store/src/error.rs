//! Error types for store operations.

use crate::engine::EngineError;
use thiserror::Error;
use vellum_core::{CodecError, ValidationError};

/// Errors surfaced to callers of the store.
///
/// Write conflicts are deliberately absent: a lost revision race is reported
/// through [`crate::SaveOutcome::ConflictIgnored`], not as a failure.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Malformed envelope; nothing was sent to the engine.
    #[error("Invalid envelope: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid query: {0}")]
    Query(String),

    /// The engine rejected a read, write or delete.
    #[error("{op} failed: {source}")]
    Persistence {
        op: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("Document not found: {0}")]
    NotFound(String),

    /// No store has been opened yet.
    #[error("no store is open; open or create a store first")]
    Uninitialized,

    #[error("store `{0}` has been closed")]
    Closed(String),

    /// The engine failed unrecoverably; the store must be reopened.
    #[error("store `{name}` failed: {reason}")]
    Failed { name: String, reason: String },

    /// The dedup index could not be read, so the payload was not stored.
    #[error("dedup index unavailable: {0}")]
    DedupIndex(Box<StoreError>),

    /// An administrative operation is not allowed in the current state.
    #[error("Operation rejected: {0}")]
    Rejected(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StoreError {
    pub(crate) fn persistence(op: &'static str, source: EngineError) -> Self {
        StoreError::Persistence { op, source }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
