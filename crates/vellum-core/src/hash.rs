//! Content hashing for deduplicated payloads.
//!
//! Uses SHA-256 over a canonical JSON rendering of a document with its
//! identity fields removed, so two submissions of the same bytes under
//! different ids hash identically.

use crate::error::CodecError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};

/// Fields that identify a stored copy rather than describe its content.
const IDENTITY_FIELDS: &[&str] = &["id", "_id", "_rev"];

/// A 32-byte SHA-256 digest of a document payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash raw bytes directly.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&Sha256::digest(data));
        ContentHash(bytes)
    }

    /// Hash the payload fields of a serializable document.
    ///
    /// Object keys are emitted in sorted order by `serde_json::Map`, which
    /// keeps the digest independent of field declaration order.
    pub fn of_document<T: Serialize>(doc: &T) -> Result<Self, CodecError> {
        let mut value = serde_json::to_value(doc)?;
        if let Some(map) = value.as_object_mut() {
            for field in IDENTITY_FIELDS {
                map.remove(*field);
            }
        }
        let canonical = serde_json::to_vec(&value)?;
        Ok(Self::of_bytes(&canonical))
    }

    /// Lowercase hex, the key format of the `hashCodes` index.
    pub fn to_hex(&self) -> String {
        self.0.iter().fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
    }

    /// Hex prefix for logs.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}
