//! In-memory read-through cache of envelopes, keyed by application id.
//!
//! The cache has no eviction policy: it holds configuration documents, whose
//! working set is small. Entries are overwritten on every local write and on
//! every remote change, and dropped on delete or when the store is switched.
//!
//! Every mutation bumps a per-id generation. A reader that fetched a value
//! from the engine can populate the cache with
//! [`DocumentCache::set_if_unchanged`], which refuses to install the value if
//! a write, delete or remote change touched that id while the read was in
//! flight.

use crate::envelope::Envelope;
use std::collections::HashMap;

/// Opaque marker of the cache state for one id at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStamp {
    epoch: u64,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct DocumentCache {
    entries: HashMap<String, Envelope>,
    generations: HashMap<String, u64>,
    epoch: u64,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Envelope> {
        self.entries.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn set(&mut self, id: impl Into<String>, envelope: Envelope) {
        let id = id.into();
        self.bump(&id);
        self.entries.insert(id, envelope);
    }

    pub fn clear(&mut self, id: &str) {
        self.bump(id);
        self.entries.remove(id);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.generations.clear();
        self.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capture the state of `id` before starting an engine read.
    pub fn stamp(&self, id: &str) -> CacheStamp {
        CacheStamp {
            epoch: self.epoch,
            generation: self.generations.get(id).copied().unwrap_or(0),
        }
    }

    /// Install a value read from the engine unless `id` changed since `stamp`.
    ///
    /// Returns whether the value was installed.
    pub fn set_if_unchanged(&mut self, id: &str, envelope: Envelope, stamp: CacheStamp) -> bool {
        if self.stamp(id) != stamp {
            return false;
        }
        self.set(id, envelope);
        true
    }

    fn bump(&mut self, id: &str) {
        *self.generations.entry(id.to_string()).or_insert(0) += 1;
    }
}
