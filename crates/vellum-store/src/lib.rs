//! # vellum-store
//!
//! Offline-first, synchronized document store.
//!
//! The store sits between the application and a storage engine that
//! replicates with an optional remote database. It keeps an in-memory
//! read-through cache coherent with local writes and asynchronously arriving
//! remote changes, pauses replication around bursts of local operations, and
//! deduplicates large binary payloads by content hash.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vellum_store::{MemoryProvider, StoreConfig, StoreManager};
//! use vellum_core::ImageAsset;
//!
//! # #[tokio::main]
//! # async fn main() -> vellum_store::Result<()> {
//! let manager = StoreManager::new(Arc::new(MemoryProvider::new()), StoreConfig::default());
//! let store = manager.open("alice", Some("https://couch.example/alice"), false).await?;
//!
//! let first = store.save_content_addressed(ImageAsset::new("data:image/png;base64,AAA")).await?;
//! let again = store.save_content_addressed(ImageAsset::new("data:image/png;base64,AAA")).await?;
//! assert_eq!(first, again);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`engine`] - storage engine, replication session and provider traits
//! - [`store`] - query/save/remove orchestration and the change feed
//! - [`scheduler`] - pause/resume of replication around local operations
//! - [`dedup`] - content-addressed saves
//! - [`manager`] - opening, switching, resetting and deleting stores
//! - [`markers`] - local state kept outside the engine
//! - [`memory`] - in-memory engine and replication for tests and demos

pub mod codec;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod markers;
pub mod memory;
pub mod scheduler;
pub mod store;

// Re-exports for convenience
pub use codec::{EnvelopeCodec, PlaintextCodec};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use engine::{
    ChangeBatch, EngineError, EngineProvider, Opened, ReplicationEvent, ReplicationSession,
    StorageEngine, SyncState,
};
pub use error::{Result, StoreError};
pub use events::{ChangeKind, StoreEvent};
pub use manager::StoreManager;
pub use markers::LocalMarkers;
pub use memory::{Call, CallLog, MemoryEngine, MemoryProvider, MemoryReplication};
pub use scheduler::SyncScheduler;
pub use store::{QueryResult, SaveOutcome, Store};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::engine::{StorageEngine, SyncState};
    pub use crate::error::StoreError;
    pub use crate::manager::StoreManager;
    pub use crate::store::{QueryResult, SaveOutcome, Store};
    pub use vellum_core::{DocumentKind, Envelope, ImageAsset, Metadata, ModelAsset};
}
