//! In-memory document store.

use std::collections::HashMap;

use parking_lot::RwLock;
use replidoc_protocol::{Checkpoint, Document};

use crate::error::StorageResult;
use crate::store::DocumentStore;

/// An in-memory document store.
///
/// Suitable for unit and integration tests, the CLI simulation, and
/// ephemeral replicas that do not need persistence.
///
/// # Thread Safety
///
/// All state sits behind a single `RwLock`; the store can be shared across
/// threads behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with the given documents.
    ///
    /// Later entries win on duplicate primary keys.
    #[must_use]
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let map = documents
            .into_iter()
            .map(|doc| (doc.passport_id.clone(), doc))
            .collect();
        Self {
            documents: RwLock::new(map),
        }
    }

    /// Returns a copy of every record, tombstones included, in no
    /// particular order. Useful in tests.
    #[must_use]
    pub fn dump(&self) -> Vec<Document> {
        self.documents.read().values().cloned().collect()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, passport_id: &str) -> StorageResult<Option<Document>> {
        Ok(self.documents.read().get(passport_id).cloned())
    }

    fn put(&self, document: Document) -> StorageResult<()> {
        self.documents
            .write()
            .insert(document.passport_id.clone(), document);
        Ok(())
    }

    fn list_since(
        &self,
        checkpoint: Option<&Checkpoint>,
        limit: usize,
    ) -> StorageResult<Vec<Document>> {
        let mut matched: Vec<Document> = self
            .documents
            .read()
            .values()
            .filter(|doc| checkpoint.map_or(true, |cp| !cp.covers(doc)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            (a.updated, a.passport_id.as_str()).cmp(&(b.updated, b.passport_id.as_str()))
        });
        matched.truncate(limit);
        Ok(matched)
    }

    fn visible(&self) -> StorageResult<Vec<Document>> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|doc| !doc.deleted)
            .cloned()
            .collect())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.documents.read().len())
    }

    fn clear(&self) -> StorageResult<()> {
        self.documents.write().clear();
        Ok(())
    }
}
