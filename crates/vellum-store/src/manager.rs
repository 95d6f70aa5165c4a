//! Ownership of the one open store and switching between stores.
//!
//! At most one store is open per manager. Switching (login, logout, user
//! change) fully closes the previous store before the next one is opened.

use crate::codec::{EnvelopeCodec, PlaintextCodec};
use crate::config::StoreConfig;
use crate::engine::{EngineProvider, SyncState};
use crate::error::{Result, StoreError};
use crate::markers::LocalMarkers;
use crate::store::Store;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

pub struct StoreManager<P: EngineProvider> {
    provider: Arc<P>,
    config: StoreConfig,
    codec: Arc<dyn EnvelopeCodec>,
    markers: Arc<LocalMarkers>,
    current: RwLock<Option<Arc<Store<P::Engine>>>>,
    switching: tokio::sync::Mutex<()>,
}

impl<P: EngineProvider> StoreManager<P> {
    pub fn new(provider: Arc<P>, config: StoreConfig) -> Self {
        let markers = match &config.markers_path {
            Some(path) => LocalMarkers::with_file(path),
            None => LocalMarkers::in_memory(),
        };
        Self {
            provider,
            config,
            codec: Arc::new(PlaintextCodec),
            markers: Arc::new(markers),
            current: RwLock::new(None),
            switching: tokio::sync::Mutex::new(()),
        }
    }

    /// Use `codec` to seal payloads of stores opened from now on.
    pub fn with_codec(mut self, codec: Arc<dyn EnvelopeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn markers(&self) -> &Arc<LocalMarkers> {
        &self.markers
    }

    /// The open store.
    pub fn current(&self) -> Result<Arc<Store<P::Engine>>> {
        self.current.read().clone().ok_or(StoreError::Uninitialized)
    }

    /// Open the database `name`.
    ///
    /// If it is already open and `remote` is given, only replication is
    /// started. Otherwise the current store is closed first.
    pub async fn open(
        &self,
        name: &str,
        remote: Option<&str>,
        only_remote: bool,
    ) -> Result<Arc<Store<P::Engine>>> {
        let _switch = self.switching.lock().await;
        self.open_locked(name, remote, only_remote).await
    }

    /// Open a database that was just created (e.g. right after
    /// registration). There is nothing to pull yet, so it counts as fully
    /// synced and replication resumes without delay.
    pub async fn create(
        &self,
        name: &str,
        remote: Option<&str>,
        only_remote: bool,
    ) -> Result<Arc<Store<P::Engine>>> {
        let _switch = self.switching.lock().await;
        self.close_locked().await?;
        self.markers.mark_synced(name);
        self.open_locked(name, remote, only_remote).await
    }

    pub async fn close_current(&self) -> Result<()> {
        let _switch = self.switching.lock().await;
        self.close_locked().await
    }

    /// Wipe the local default store and reopen it empty. Rejected for any
    /// other store.
    pub async fn reset_store(&self) -> Result<Arc<Store<P::Engine>>> {
        let _switch = self.switching.lock().await;
        let store = self.current()?;
        if !store.is_using_local() || store.name() != self.config.local_default_name {
            return Err(StoreError::Rejected(format!(
                "only the local default store `{}` can be reset",
                self.config.local_default_name
            )));
        }
        store.destroy().await?;
        self.close_locked().await?;
        let name = self.config.local_default_name.clone();
        self.open_locked(&name, None, false).await
    }

    /// Delete the local database `name`, closing it first if it is open.
    ///
    /// Rejected for an empty name and for the open store when it is backed
    /// by the remote database.
    pub async fn delete_store(&self, name: &str) -> Result<()> {
        let _switch = self.switching.lock().await;
        if name.is_empty() {
            return Err(StoreError::Rejected("no store name given".to_string()));
        }
        let current = self.current.read().clone();
        if let Some(store) = current {
            if store.name() == name && !store.is_using_local() {
                warn!(database = name, "refusing to delete the open remote store");
                return Err(StoreError::Rejected(format!(
                    "store `{}` is open against the remote database",
                    name
                )));
            }
        }
        if self.opened_store_name().as_deref() == Some(name) {
            self.close_locked().await?;
        }
        self.provider
            .destroy(name)
            .await
            .map_err(|e| StoreError::persistence("delete store", e))?;
        self.markers.unmark_synced(name);
        info!(database = name, "store deleted");
        Ok(())
    }

    pub fn opened_store_name(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.name().to_string())
    }

    /// `None` when no store is open.
    pub fn is_using_local_store(&self) -> Option<bool> {
        self.current.read().as_ref().map(|s| s.is_using_local())
    }

    pub fn sync_state(&self) -> SyncState {
        self.current
            .read()
            .as_ref()
            .map_or(SyncState::Uninitialized, |s| s.sync_state())
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .map_or(false, |s| s.is_sync_enabled())
    }

    async fn open_locked(
        &self,
        name: &str,
        remote: Option<&str>,
        only_remote: bool,
    ) -> Result<Arc<Store<P::Engine>>> {
        let current = self.current.read().clone();
        if let (Some(store), Some(address)) = (current, remote) {
            if store.name() == name && store.is_open() && store.is_using_local() && !only_remote {
                store.start_sync(address).await?;
                return Ok(store);
            }
        }

        self.close_locked().await?;
        let opened = self
            .provider
            .open(name, remote, only_remote)
            .await
            .map_err(|e| StoreError::persistence("open store", e))?;
        let store = Arc::new(Store::new(
            name,
            opened,
            self.codec.clone(),
            self.markers.clone(),
            &self.config,
        ));
        *self.current.write() = Some(store.clone());
        Ok(store)
    }

    async fn close_locked(&self) -> Result<()> {
        let previous = self.current.write().take();
        match previous {
            Some(store) => store.close().await,
            None => Ok(()),
        }
    }
}
