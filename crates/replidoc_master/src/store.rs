//! The authoritative master store.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use parking_lot::Mutex;
use replidoc_protocol::{
    resolve, validate_document, ChangeRequest, Checkpoint, Document, MasterRecord,
    PullStreamEvent, PushOutcome,
};
use replidoc_storage::{DocumentStore, MemoryStore};
use tracing::{debug, info, warn};

use crate::clock::RevisionClock;
use crate::error::MasterResult;
use crate::notifier::ChangeNotifier;

/// The single authoritative store the protocol replicates against.
///
/// Owns its records, the revision clock, and the live change stream; nothing
/// about it is ambient or module-global. Whole change batches are serialized
/// against each other, so for any key and revision at most one racing push is
/// accepted and every loser observes the winner's committed record.
pub struct MasterStore {
    records: Arc<dyn DocumentStore>,
    clock: RevisionClock,
    notifier: ChangeNotifier,
    /// Serializes the read-resolve-write sequence across batches.
    write_lock: Mutex<()>,
}

impl MasterStore {
    /// Creates a master over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Creates a master over an existing document store.
    pub fn with_store(records: Arc<dyn DocumentStore>) -> Self {
        Self {
            records,
            clock: RevisionClock::new(),
            notifier: ChangeNotifier::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Applies a batch of change requests in order and returns the conflicts.
    ///
    /// Each request is resolved against the master state at the instant of
    /// processing, so later same-key entries in one batch observe the effects
    /// of earlier ones. Accepted writes are stamped with a fresh revision;
    /// the client-supplied `updated` is always discarded. Conflicting
    /// requests produce no write and contribute the current master record to
    /// the returned list, preserving input order.
    ///
    /// A request whose document fails validation is skipped with a warning;
    /// the rest of the batch proceeds.
    pub fn apply_change_batch(
        &self,
        requests: Vec<ChangeRequest>,
    ) -> MasterResult<Vec<MasterRecord>> {
        let _guard = self.write_lock.lock();

        let mut conflicts = Vec::new();
        let mut accepted = Vec::new();
        for request in requests {
            if let Err(err) = validate_document(&request.new_document_state) {
                warn!(key = request.key(), %err, "skipping invalid change request");
                continue;
            }

            let current = self.records.get(request.key())?;
            match resolve(request.assumed_master_state.as_ref(), current.as_ref()) {
                PushOutcome::Conflict(master) => {
                    debug!(key = request.key(), "push conflicts with current master state");
                    conflicts.push(master);
                }
                outcome => {
                    let mut document = request.new_document_state;
                    document.updated = self.clock.next();
                    debug!(
                        key = %document.passport_id,
                        revision = %document.updated,
                        create = matches!(outcome, PushOutcome::AcceptCreate),
                        "accepted push"
                    );
                    self.records.put(document.clone())?;
                    accepted.push(document);
                }
            }
        }

        if let Some(last) = accepted.last() {
            let event = PullStreamEvent {
                checkpoint: Checkpoint::for_document(last),
                documents: accepted,
            };
            self.notifier.publish(&event);
        }

        Ok(conflicts)
    }

    /// Returns records strictly after `checkpoint`, ordered by
    /// `(updated, passport_id)` ascending, at most `limit` entries.
    pub fn fetch_since(
        &self,
        checkpoint: Option<&Checkpoint>,
        limit: usize,
    ) -> MasterResult<Vec<MasterRecord>> {
        Ok(self.records.list_since(checkpoint, limit)?)
    }

    /// Clears every record. The revision clock keeps its floor, so writes
    /// after a reset still sort newer than anything clients checkpointed.
    pub fn reset(&self) -> MasterResult<()> {
        let _guard = self.write_lock.lock();
        self.records.clear()?;
        info!("master store reset");
        Ok(())
    }

    /// Writes a record directly, bypassing conflict checks.
    ///
    /// The supplied `updated` is kept verbatim and the clock floor is raised
    /// past it. Used for seeding and admin repair, never on the push path.
    pub fn upsert_unchecked(&self, document: Document) -> MasterResult<()> {
        let _guard = self.write_lock.lock();
        self.clock.observe(document.updated);
        self.records.put(document.clone())?;
        info!(key = %document.passport_id, revision = %document.updated, "direct upsert");
        let event = PullStreamEvent {
            checkpoint: Checkpoint::for_document(&document),
            documents: vec![document],
        };
        self.notifier.publish(&event);
        Ok(())
    }

    /// Registers a live change stream subscriber.
    pub fn subscribe(&self) -> Receiver<PullStreamEvent> {
        self.notifier.subscribe()
    }

    /// Fetches a single record, tombstones included. Inspection helper.
    pub fn record(&self, passport_id: &str) -> MasterResult<Option<MasterRecord>> {
        Ok(self.records.get(passport_id)?)
    }

    /// Number of records held, tombstones included.
    pub fn record_count(&self) -> MasterResult<usize> {
        Ok(self.records.len()?)
    }
}

impl Default for MasterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use replidoc_protocol::epoch;

    fn doc(id: &str, age: u32) -> Document {
        Document::new(id, "Bob", "Kelso", age)
    }

    #[test]
    fn create_is_accepted_and_stamped() {
        let master = MasterStore::new();
        let conflicts = master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 56))])
            .unwrap();
        assert!(conflicts.is_empty());

        let stored = master.record("p1").unwrap().unwrap();
        assert_eq!(stored.age, 56);
        assert!(stored.updated > epoch());
    }

    #[test]
    fn client_supplied_revision_is_never_persisted() {
        let master = MasterStore::new();
        let bogus = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 1).with_updated(bogus))])
            .unwrap();
        let stored = master.record("p1").unwrap().unwrap();
        assert_ne!(stored.updated, bogus);
    }

    #[test]
    fn stale_basis_conflicts_without_writing() {
        let master = MasterStore::new();
        master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 100))])
            .unwrap();
        let committed = master.record("p1").unwrap().unwrap();

        // Assumed state carries a revision the master never issued.
        let stale = doc("p1", 80).with_updated(epoch());
        let conflicts = master
            .apply_change_batch(vec![ChangeRequest::update(stale, doc("p1", 40))])
            .unwrap();

        assert_eq!(conflicts, vec![committed.clone()]);
        assert_eq!(master.record("p1").unwrap().unwrap(), committed);
    }

    #[test]
    fn matching_basis_is_accepted_with_new_revision() {
        let master = MasterStore::new();
        master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 56))])
            .unwrap();
        let first = master.record("p1").unwrap().unwrap();

        let conflicts = master
            .apply_change_batch(vec![ChangeRequest::update(first.clone(), doc("p1", 57))])
            .unwrap();
        assert!(conflicts.is_empty());

        let second = master.record("p1").unwrap().unwrap();
        assert_eq!(second.age, 57);
        assert!(second.updated > first.updated);
    }

    #[test]
    fn create_race_has_exactly_one_winner() {
        let master = MasterStore::new();
        let first = master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 1))])
            .unwrap();
        assert!(first.is_empty());
        let winner = master.record("p1").unwrap().unwrap();

        let second = master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 2))])
            .unwrap();
        assert_eq!(second, vec![winner.clone()]);
        assert_eq!(master.record("p1").unwrap().unwrap(), winner);
    }

    #[test]
    fn later_batch_entries_observe_earlier_ones() {
        let master = MasterStore::new();
        let conflicts = master
            .apply_change_batch(vec![
                ChangeRequest::create(doc("p1", 1)),
                ChangeRequest::create(doc("p1", 2)),
            ])
            .unwrap();
        // The second create loses against the first entry's commit.
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].age, 1);
        assert_eq!(master.record("p1").unwrap().unwrap().age, 1);
    }

    #[test]
    fn invalid_entries_are_skipped_not_fatal() {
        let master = MasterStore::new();
        let conflicts = master
            .apply_change_batch(vec![
                ChangeRequest::create(doc("", 10)),
                ChangeRequest::create(doc("p2", 200)),
                ChangeRequest::create(doc("p3", 30)),
            ])
            .unwrap();
        assert!(conflicts.is_empty());
        assert_eq!(master.record_count().unwrap(), 1);
        assert_eq!(master.record("p3").unwrap().unwrap().age, 30);
    }

    #[test]
    fn conflicts_preserve_request_order() {
        let master = MasterStore::new();
        master
            .apply_change_batch(vec![
                ChangeRequest::create(doc("a", 1)),
                ChangeRequest::create(doc("b", 2)),
            ])
            .unwrap();

        let conflicts = master
            .apply_change_batch(vec![
                ChangeRequest::create(doc("b", 20)),
                ChangeRequest::create(doc("a", 10)),
            ])
            .unwrap();
        let keys: Vec<&str> = conflicts.iter().map(|c| c.passport_id.as_str()).collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn fetch_since_pages_through_history() {
        let master = MasterStore::new();
        for n in 0..5 {
            master
                .apply_change_batch(vec![ChangeRequest::create(doc(&format!("p{n}"), n))])
                .unwrap();
        }

        let first = master.fetch_since(None, 2).unwrap();
        assert_eq!(first.len(), 2);
        let cp = Checkpoint::for_document(&first[1]);

        let second = master.fetch_since(Some(&cp), 10).unwrap();
        assert_eq!(second.len(), 3);
        assert!(second.iter().all(|d| !cp.covers(d)));
    }

    #[test]
    fn accepted_batches_reach_subscribers() {
        let master = MasterStore::new();
        let rx = master.subscribe();
        master
            .apply_change_batch(vec![
                ChangeRequest::create(doc("p1", 1)),
                ChangeRequest::create(doc("p2", 2)),
            ])
            .unwrap();

        let event = rx.recv().unwrap();
        assert_eq!(event.documents.len(), 2);
        assert_eq!(event.checkpoint.last_id.as_deref(), Some("p2"));
        assert_eq!(event.checkpoint.last_update, event.documents[1].updated);
    }

    #[test]
    fn all_conflict_batches_emit_no_event() {
        let master = MasterStore::new();
        master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 1))])
            .unwrap();
        let rx = master.subscribe();
        master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 9))])
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reset_clears_records_but_not_the_clock() {
        let master = MasterStore::new();
        master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 1))])
            .unwrap();
        let before = master.record("p1").unwrap().unwrap().updated;

        master.reset().unwrap();
        assert_eq!(master.record_count().unwrap(), 0);

        master
            .apply_change_batch(vec![ChangeRequest::create(doc("p1", 2))])
            .unwrap();
        assert!(master.record("p1").unwrap().unwrap().updated > before);
    }

    #[test]
    fn upsert_unchecked_keeps_revision_and_raises_floor() {
        let master = MasterStore::new();
        let seeded_rev = Utc.with_ymd_and_hms(2123, 6, 1, 0, 0, 0).unwrap();
        master
            .upsert_unchecked(doc("p1", 77).with_updated(seeded_rev))
            .unwrap();

        assert_eq!(master.record("p1").unwrap().unwrap().updated, seeded_rev);

        // Later accepted pushes must still sort after the seeded revision.
        master
            .apply_change_batch(vec![ChangeRequest::create(doc("p2", 1))])
            .unwrap();
        assert!(master.record("p2").unwrap().unwrap().updated > seeded_rev);
    }
}
