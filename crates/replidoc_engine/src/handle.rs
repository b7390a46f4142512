//! Application-facing document access.

use std::sync::Arc;

use replidoc_protocol::{epoch, validate_document, Document};
use tracing::debug;

use crate::error::EngineResult;
use crate::state::SharedState;

/// Local read and write access to the replicated collection.
///
/// Writes land in the local store immediately and flag their key for
/// the push pipeline; the handle never talks to the network itself.
/// Cloning is cheap, all handles share the engine's state.
#[derive(Clone)]
pub struct ReplicaHandle {
    shared: Arc<SharedState>,
}

impl ReplicaHandle {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// Creates or edits a document locally.
    ///
    /// The caller supplies the business fields. The revision marker is
    /// pinned to the last state this replica saw for the key, or to the
    /// epoch for a brand-new document, so the master can tell stale
    /// edits from current ones; the committed revision is assigned by
    /// the master when the change is pushed.
    pub fn upsert(&self, document: Document) -> EngineResult<()> {
        validate_document(&document)?;
        let mut document = document;
        let key = document.passport_id.clone();

        let _gate = self.shared.write_gate.lock();
        let existing = self.shared.store.get(&key)?;
        document.updated = existing.map_or_else(epoch, |known| known.updated);
        document.deleted = false;
        self.shared.store.put(document)?;
        self.shared.mark_dirty(key.clone());
        debug!(key = %key, "recorded local upsert");
        Ok(())
    }

    /// Deletes a document locally by writing a tombstone.
    ///
    /// The tombstone keeps the document's revision pin and replicates
    /// like any other edit. Returns false when the key is unknown or
    /// already deleted.
    pub fn remove(&self, passport_id: &str) -> EngineResult<bool> {
        let _gate = self.shared.write_gate.lock();
        let Some(existing) = self.shared.store.get(passport_id)? else {
            return Ok(false);
        };
        if existing.deleted {
            return Ok(false);
        }
        self.shared.store.put(existing.into_tombstone())?;
        self.shared.mark_dirty(passport_id.to_string());
        debug!(key = %passport_id, "recorded local delete");
        Ok(true)
    }

    /// Reads a live document. Tombstones read as absent.
    pub fn get(&self, passport_id: &str) -> EngineResult<Option<Document>> {
        Ok(self
            .shared
            .store
            .get(passport_id)?
            .filter(|document| !document.deleted))
    }

    /// All live documents in the local store.
    pub fn all(&self) -> EngineResult<Vec<Document>> {
        Ok(self.shared.store.visible()?)
    }

    /// Number of local changes waiting to be pushed.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.shared.ledger.lock().dirty_count()
    }
}
