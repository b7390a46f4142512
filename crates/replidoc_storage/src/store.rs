//! Document store trait definition.

use replidoc_protocol::{Checkpoint, Document};

use crate::error::StorageResult;

/// A keyed store of replicated documents.
///
/// The same trait serves both sides of the protocol: the master holds its
/// authoritative records in one, and every replica holds its local copy in
/// another. Stores hold whole documents and do not interpret them beyond the
/// primary key and the `(updated, passport_id)` ordering used for incremental
/// listing.
///
/// # Invariants
///
/// - At most one record per primary key; `put` overwrites.
/// - Tombstones (`deleted = true`) are ordinary records: `get` and
///   `list_since` return them, only `visible` filters them out.
/// - `list_since` orders by `(updated, passport_id)` ascending and returns
///   only records strictly after the checkpoint position, so repeated calls
///   with advancing checkpoints enumerate every record exactly once.
/// - Implementations must be `Send + Sync`; callers share them across the
///   push and pull pipelines.
///
/// # Implementors
///
/// - [`super::MemoryStore`] - in-memory reference implementation
pub trait DocumentStore: Send + Sync {
    /// Fetches the record for a primary key, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn get(&self, passport_id: &str) -> StorageResult<Option<Document>>;

    /// Inserts or overwrites the record for `document.passport_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn put(&self, document: Document) -> StorageResult<()>;

    /// Lists records strictly after `checkpoint`, ordered by
    /// `(updated, passport_id)` ascending, at most `limit` entries.
    ///
    /// `None` means "from the beginning".
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn list_since(
        &self,
        checkpoint: Option<&Checkpoint>,
        limit: usize,
    ) -> StorageResult<Vec<Document>>;

    /// All non-deleted documents, in unspecified order.
    ///
    /// This is the query surface an application reads; tombstones are
    /// filtered out here and only here.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn visible(&self) -> StorageResult<Vec<Document>>;

    /// Number of stored records, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn len(&self) -> StorageResult<usize>;

    /// True when the store holds no records at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every record, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn clear(&self) -> StorageResult<()>;
}
