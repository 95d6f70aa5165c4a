//! # vellum-core
//!
//! Data model for the Vellum offline-first document store.
//!
//! This crate provides:
//! - [`Envelope`], the encrypted storage-facing form of every document
//! - typed document kinds ([`Metadata`], [`ImageAsset`], [`ModelAsset`]) and
//!   the runtime tagged union [`AnyDocument`]
//! - [`ContentHash`] for deduplicating large payloads
//! - [`DocumentCache`], the read-through cache kept coherent by the store
//!
//! Nothing here performs I/O; the async orchestration lives in `vellum-store`.

pub mod cache;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod kind;
pub mod version;

pub use cache::{CacheStamp, DocumentCache};
pub use envelope::{Envelope, Selector};
pub use error::{CodecError, ValidationError};
pub use hash::ContentHash;
pub use kind::{generate_id, AnyDocument, DocumentKind, HashCodes, ImageAsset, Metadata, ModelAsset};
pub use version::{ModelVersion, ParseVersionError};
