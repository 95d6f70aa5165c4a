//! Application-facing change notifications.

use vellum_core::Envelope;

/// How a batch of remote changes relates to the local data model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Ordinary remote update.
    Updated,
    /// The batch raised the recorded major data-model version: another
    /// client writes with a newer schema and the application should migrate
    /// or reload.
    DataModelChanged,
}

/// A batch of remote changes, raised after the cache has been updated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: ChangeKind,
    pub ids: Vec<String>,
    pub documents: Vec<Envelope>,
}
