//! Small pieces of local state kept outside the storage engine.
//!
//! Two markers are tracked:
//! - the highest data-model version each user's database has seen, used to
//!   tell ordinary remote changes from changes written by a newer schema;
//! - the databases that completed a full sync at least once, which lets the
//!   scheduler resume replication without delay.
//!
//! Marker operations never fail. When a file path is configured the state is
//! rewritten after each mutation and I/O problems are only logged.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vellum_core::ModelVersion;

/// Major version assumed for a user that has no recorded version yet.
const DEFAULT_MAJOR: u64 = 1;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct MarkerState {
    #[serde(default)]
    model_versions: HashMap<String, ModelVersion>,
    #[serde(default)]
    synced: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct LocalMarkers {
    state: RwLock<MarkerState>,
    path: Option<PathBuf>,
}

impl LocalMarkers {
    /// Markers held in memory only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Markers backed by a JSON file, loaded now if it exists.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "discarding unreadable markers file");
                MarkerState::default()
            }),
            Err(_) => MarkerState::default(),
        };
        Self {
            state: RwLock::new(state),
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Major data-model version recorded for `user`.
    pub fn user_major_version(&self, user: &str) -> u64 {
        self.state
            .read()
            .model_versions
            .get(user)
            .map_or(DEFAULT_MAJOR, |v| v.major)
    }

    /// Record `version` for `user` if its major component is newer.
    pub fn record_model_version(&self, user: &str, version: ModelVersion) {
        {
            let mut state = self.state.write();
            let current = state
                .model_versions
                .get(user)
                .map_or(DEFAULT_MAJOR, |v| v.major);
            if version.major <= current {
                return;
            }
            debug!(user, %version, "raising recorded data model version");
            state.model_versions.insert(user.to_string(), version);
        }
        self.flush();
    }

    pub fn mark_synced(&self, database: &str) {
        {
            let mut state = self.state.write();
            if state.synced.contains_key(database) {
                return;
            }
            state.synced.insert(database.to_string(), Utc::now());
        }
        self.flush();
    }

    pub fn is_synced(&self, database: &str) -> bool {
        self.state.read().synced.contains_key(database)
    }

    /// When `database` first completed a full sync.
    pub fn synced_at(&self, database: &str) -> Option<DateTime<Utc>> {
        self.state.read().synced.get(database).copied()
    }

    pub fn unmark_synced(&self, database: &str) {
        let removed = self.state.write().synced.remove(database).is_some();
        if removed {
            self.flush();
        }
    }

    fn flush(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let snapshot = self.state.read().clone();
        let result = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|bytes| std::fs::write(path, bytes).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to persist local markers");
        }
    }
}
