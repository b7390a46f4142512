//! Book-keeping for locally changed documents.

use std::collections::{BTreeSet, HashMap};

use replidoc_protocol::MasterRecord;

/// Tracks which documents carry unpushed local edits and what this
/// replica last saw committed on the master for each key.
///
/// The dirty set drives the push pipeline: keys leave the set when a
/// batch is built and only come back if the batch is abandoned. The
/// confirmed map supplies the assumed master state for outgoing change
/// requests; a missing entry means this replica believes the master has
/// never seen the document, which makes the next push a create.
#[derive(Debug, Default)]
pub(crate) struct ChangeLedger {
    dirty: BTreeSet<String>,
    confirmed: HashMap<String, MasterRecord>,
}

impl ChangeLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Flags a document as carrying an unpushed local edit.
    pub(crate) fn mark_dirty(&mut self, passport_id: impl Into<String>) {
        self.dirty.insert(passport_id.into());
    }

    pub(crate) fn is_dirty(&self, passport_id: &str) -> bool {
        self.dirty.contains(passport_id)
    }

    pub(crate) fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Removes and returns up to `limit` dirty keys, in key order.
    ///
    /// Key order keeps batches deterministic, which the tests and the
    /// master's conflict reporting both rely on.
    pub(crate) fn take_batch(&mut self, limit: usize) -> Vec<String> {
        let keys: Vec<String> = self.dirty.iter().take(limit).cloned().collect();
        for key in &keys {
            self.dirty.remove(key);
        }
        keys
    }

    /// Puts abandoned batch keys back into the dirty set.
    pub(crate) fn requeue(&mut self, passport_ids: impl IntoIterator<Item = String>) {
        for passport_id in passport_ids {
            self.dirty.insert(passport_id);
        }
    }

    /// Drops the dirty flag, if set. Returns whether it was set.
    pub(crate) fn clear_dirty(&mut self, passport_id: &str) -> bool {
        self.dirty.remove(passport_id)
    }

    /// The master state this replica would assume when pushing the key.
    pub(crate) fn assumed(&self, passport_id: &str) -> Option<&MasterRecord> {
        self.confirmed.get(passport_id)
    }

    /// Records a master state for the key.
    ///
    /// Confirmations are monotonic on the revision marker: a record
    /// older than what is already confirmed is ignored, so redelivered
    /// pull pages cannot roll the assumed state backwards. An
    /// equal-revision record replaces the entry, which is how a settled
    /// push refreshes the content behind an unchanged revision.
    pub(crate) fn confirm(&mut self, record: MasterRecord) -> bool {
        match self.confirmed.get(&record.passport_id) {
            Some(existing) if record.updated < existing.updated => false,
            _ => {
                self.confirmed.insert(record.passport_id.clone(), record);
                true
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }
}
