//! Content-addressed saves for large, frequently re-submitted payloads.
//!
//! Images and uploaded model files are often saved again unchanged (reopening
//! an editor re-uploads the same image). Their content hash is registered in
//! the metadata document's `hashCodes` index, and a second payload with the
//! same hash resolves to the id of the stored copy instead of being written.

use crate::engine::StorageEngine;
use crate::error::{Result, StoreError};
use crate::store::{SaveOutcome, Store};
use tracing::{debug, error, warn};
use vellum_core::{ContentHash, DocumentKind};

impl<E: StorageEngine> Store<E> {
    /// Save `data` unless identical content of the same kind is already
    /// stored, and return the id under which the content lives.
    ///
    /// Calls on one store are serialized so the index cannot lose entries or
    /// be created twice. Both writes go through the regular save path, so the
    /// cache stays coherent.
    pub async fn save_content_addressed<K: DocumentKind>(&self, mut data: K) -> Result<String> {
        let _index = self.dedup_lock.lock().await;

        let mut metadata = self
            .metadata()
            .await
            .map_err(|e| StoreError::DedupIndex(Box::new(e)))?;
        let hash = ContentHash::of_document(&data)?;

        if let Some(owner) = metadata.hash_owner(K::MODEL_NAME, &hash).map(str::to_string) {
            if !self.query(Some(K::MODEL_NAME), Some(&owner)).await?.is_none() {
                debug!(model = K::MODEL_NAME, hash = %hash.short(), %owner, "hash found, not saving");
                return Ok(owner);
            }
            warn!(model = K::MODEL_NAME, %owner, "indexed owner is gone, storing payload again");
        }

        data.ensure_id();
        let id = data.id().to_string();
        metadata.register_hash(K::MODEL_NAME, &hash, &id);
        debug!(model = K::MODEL_NAME, hash = %hash.short(), %id, "hash not found, saving");

        let (stored, indexed) =
            futures::join!(self.save_document(&data), self.save_document(&metadata));
        match (stored, indexed) {
            (Ok(_), Ok(SaveOutcome::ConflictIgnored)) => {
                warn!(%id, "metadata changed remotely, content stored without index entry");
                Ok(id)
            }
            (Ok(_), Ok(_)) => Ok(id),
            (Err(e), Ok(_)) => {
                metadata.forget_hash(K::MODEL_NAME, &hash);
                if let Err(rollback) = self.save_document(&metadata).await {
                    error!(%id, error = %rollback, "could not remove index entry of unsaved payload");
                }
                Err(e)
            }
            (_, Err(e)) => Err(e),
        }
    }
}
