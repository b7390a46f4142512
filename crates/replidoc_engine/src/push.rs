//! Batched push of local changes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use replidoc_protocol::{ChangeRequest, MasterRecord};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::state::SharedState;
use crate::transport::MasterTransport;

/// What one push pass accomplished.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PushReport {
    pub(crate) settled: u64,
    pub(crate) conflicts: u64,
}

/// One batch in flight, kept unchanged for retries.
#[derive(Debug, Clone)]
struct PushBatch {
    requests: Vec<ChangeRequest>,
}

/// Sends pending local changes to the master in bounded batches.
pub(crate) struct PushPipeline {
    shared: Arc<SharedState>,
    transport: Arc<dyn MasterTransport>,
    batch_size: usize,
    /// A batch that failed in transit stays here and is retried
    /// unmodified. Edits made meanwhile re-dirty their keys and ride a
    /// later batch instead of mutating the one in flight.
    in_flight: Mutex<Option<PushBatch>>,
}

impl PushPipeline {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        transport: Arc<dyn MasterTransport>,
        batch_size: usize,
    ) -> Self {
        Self {
            shared,
            transport,
            batch_size,
            in_flight: Mutex::new(None),
        }
    }

    /// Pushes batches until no pending changes remain.
    ///
    /// A transport error aborts the pass with the failed batch kept in
    /// flight; the caller backs off and calls again.
    pub(crate) fn push_pending(&self) -> EngineResult<PushReport> {
        let mut report = PushReport::default();
        loop {
            self.shared.check_cancelled()?;
            let Some(batch) = self.next_batch()? else {
                break;
            };
            debug!(requests = batch.requests.len(), "sending push batch");
            let conflicts = self.transport.push(&batch.requests)?;
            let batch_report = self.settle(&batch, conflicts)?;
            report.settled += batch_report.settled;
            report.conflicts += batch_report.conflicts;
        }
        Ok(report)
    }

    /// Whether a transport-failed batch is waiting for a retry.
    pub(crate) fn has_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Puts an in-flight batch's keys back into the dirty set.
    ///
    /// Called when a run winds down so nothing taken out of the ledger
    /// is lost; the next run re-assembles the batch from fresh state.
    pub(crate) fn abandon_in_flight(&self) {
        if let Some(batch) = self.in_flight.lock().take() {
            let mut ledger = self.shared.ledger.lock();
            ledger.requeue(batch.requests.iter().map(|r| r.key().to_string()));
            debug!(
                requests = batch.requests.len(),
                "requeued in-flight push batch"
            );
        }
    }

    /// Returns the batch to send next.
    ///
    /// An in-flight batch from a failed attempt is returned as-is.
    /// Otherwise a new batch is assembled from the dirty set under the
    /// write gate, so the document snapshots and their assumed master
    /// states are consistent with each other.
    fn next_batch(&self) -> EngineResult<Option<PushBatch>> {
        if let Some(batch) = self.in_flight.lock().clone() {
            return Ok(Some(batch));
        }

        let _gate = self.shared.write_gate.lock();
        let mut ledger = self.shared.ledger.lock();
        let keys = ledger.take_batch(self.batch_size);
        if keys.is_empty() {
            return Ok(None);
        }

        let mut requests = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(document) = self.shared.store.get(&key)? else {
                warn!(key = %key, "dirty key has no local document, dropping");
                continue;
            };
            let request = match ledger.assumed(&key) {
                Some(known) => ChangeRequest::update(known.clone(), document),
                None => ChangeRequest::create(document),
            };
            requests.push(request);
        }
        if requests.is_empty() {
            return Ok(None);
        }

        let batch = PushBatch { requests };
        *self.in_flight.lock() = Some(batch.clone());
        Ok(Some(batch))
    }

    /// Applies the master's verdict for a sent batch.
    ///
    /// Runs under the write gate as one unit. Accepted requests confirm
    /// the pushed state as the new assumed master state. Conflicts
    /// overwrite the local document with the returned master record and
    /// drop the dirty flag; the protocol requires a fresh local edit
    /// before a conflicted document is pushed again.
    fn settle(&self, batch: &PushBatch, conflicts: Vec<MasterRecord>) -> EngineResult<PushReport> {
        let mut by_key: HashMap<&str, &MasterRecord> = HashMap::with_capacity(conflicts.len());
        for conflict in &conflicts {
            by_key.insert(conflict.passport_id.as_str(), conflict);
        }

        let mut report = PushReport::default();
        {
            let _gate = self.shared.write_gate.lock();
            let mut ledger = self.shared.ledger.lock();
            for request in &batch.requests {
                let key = request.key();
                match by_key.get(key) {
                    Some(master) => {
                        self.shared.store.put((*master).clone())?;
                        ledger.confirm((*master).clone());
                        // an edit made while the batch flew loses with
                        // the rest of the stale state
                        ledger.clear_dirty(key);
                        debug!(key, "adopted master state after push conflict");
                        report.conflicts += 1;
                    }
                    None => {
                        ledger.confirm(request.new_document_state.clone());
                        report.settled += 1;
                    }
                }
            }
        }
        *self.in_flight.lock() = None;

        let mut stats = self.shared.stats.write();
        stats.batches_pushed += 1;
        stats.documents_pushed += report.settled;
        stats.conflicts_absorbed += report.conflicts;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::transport::MockTransport;
    use chrono::{TimeZone, Utc};
    use replidoc_protocol::{Document, Revision};
    use replidoc_storage::{DocumentStore, MemoryStore};

    fn revision(millis: i64) -> Revision {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn doc(id: &str, age: u32, millis: i64) -> Document {
        Document::new(id, "Ada", "Lovelace", age).with_updated(revision(millis))
    }

    fn pipeline(batch_size: usize) -> (Arc<SharedState>, Arc<MockTransport>, PushPipeline) {
        let shared = Arc::new(SharedState::new(Arc::new(MemoryStore::new())));
        let transport = Arc::new(MockTransport::new());
        let pipeline = PushPipeline::new(
            Arc::clone(&shared),
            Arc::clone(&transport) as Arc<dyn MasterTransport>,
            batch_size,
        );
        (shared, transport, pipeline)
    }

    fn dirty_doc(shared: &SharedState, document: Document) {
        shared.store.put(document.clone()).unwrap();
        shared.mark_dirty(document.passport_id);
    }

    #[test]
    fn drains_dirty_keys_in_bounded_batches() {
        let (shared, transport, pipeline) = pipeline(2);
        dirty_doc(&shared, doc("p-1", 30, 0));
        dirty_doc(&shared, doc("p-2", 40, 0));
        dirty_doc(&shared, doc("p-3", 50, 0));

        let report = pipeline.push_pending().unwrap();
        assert_eq!(report.settled, 3);
        assert_eq!(report.conflicts, 0);

        let batches = transport.pushed_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].key(), "p-1");
        assert_eq!(batches[0][1].key(), "p-2");
        assert_eq!(batches[1][0].key(), "p-3");
        assert_eq!(shared.ledger.lock().dirty_count(), 0);
    }

    #[test]
    fn first_push_is_a_create_later_pushes_carry_assumed_state() {
        let (shared, transport, pipeline) = pipeline(5);
        dirty_doc(&shared, doc("p-1", 30, 0));
        pipeline.push_pending().unwrap();

        // edit after the settle
        dirty_doc(&shared, doc("p-1", 31, 0));
        pipeline.push_pending().unwrap();

        let batches = transport.pushed_batches();
        assert!(batches[0][0].assumed_master_state.is_none());
        let assumed = batches[1][0].assumed_master_state.as_ref().unwrap();
        assert_eq!(assumed.age, 30, "assumed state is the settled push");
        assert_eq!(batches[1][0].new_document_state.age, 31);
    }

    #[test]
    fn conflict_adopts_the_master_record() {
        let (shared, transport, pipeline) = pipeline(5);
        dirty_doc(&shared, doc("p-1", 31, 1_000));
        transport.enqueue_push_conflicts(vec![doc("p-1", 99, 9_000)]);

        let report = pipeline.push_pending().unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.settled, 0);

        let stored = shared.store.get("p-1").unwrap().unwrap();
        assert_eq!(stored.age, 99);
        assert_eq!(stored.updated, revision(9_000));
        assert!(!shared.ledger.lock().is_dirty("p-1"));
        assert_eq!(shared.ledger.lock().assumed("p-1").unwrap().age, 99);
        assert_eq!(shared.stats_snapshot().conflicts_absorbed, 1);
    }

    #[test]
    fn conflicted_documents_are_not_pushed_again() {
        let (shared, transport, pipeline) = pipeline(5);
        dirty_doc(&shared, doc("p-1", 31, 1_000));
        transport.enqueue_push_conflicts(vec![doc("p-1", 99, 9_000)]);
        pipeline.push_pending().unwrap();

        let report = pipeline.push_pending().unwrap();
        assert_eq!(report.settled + report.conflicts, 0);
        assert_eq!(transport.pushed_batches().len(), 1);

        // a fresh local edit re-arms the push
        dirty_doc(&shared, doc("p-1", 32, 9_000));
        pipeline.push_pending().unwrap();
        assert_eq!(transport.pushed_batches().len(), 2);
    }

    #[test]
    fn transport_failure_retries_the_batch_unmodified() {
        let (shared, transport, pipeline) = pipeline(5);
        dirty_doc(&shared, doc("p-1", 30, 0));
        transport.enqueue_push_error(EngineError::transport_retryable("socket closed"));

        let err = pipeline.push_pending().unwrap_err();
        assert!(err.is_retryable());
        assert!(pipeline.has_in_flight());

        // an edit while the batch waits for its retry
        dirty_doc(&shared, doc("p-1", 77, 0));

        let report = pipeline.push_pending().unwrap();
        assert!(!pipeline.has_in_flight());
        assert_eq!(report.settled, 2);

        let batches = transport.pushed_batches();
        assert_eq!(batches.len(), 3);
        // the retry resends exactly the failed batch
        assert_eq!(batches[0], batches[1]);
        assert_eq!(batches[1][0].new_document_state.age, 30);
        // the new edit rides its own batch afterwards
        assert_eq!(batches[2][0].new_document_state.age, 77);
    }

    #[test]
    fn abandoning_an_in_flight_batch_requeues_its_keys() {
        let (shared, transport, pipeline) = pipeline(5);
        dirty_doc(&shared, doc("p-1", 30, 0));
        transport.enqueue_push_error(EngineError::transport_retryable("socket closed"));
        pipeline.push_pending().unwrap_err();
        assert!(pipeline.has_in_flight());

        pipeline.abandon_in_flight();
        assert!(!pipeline.has_in_flight());
        assert!(shared.ledger.lock().is_dirty("p-1"));
    }

    #[test]
    fn dirty_key_without_a_document_is_dropped() {
        let (shared, transport, pipeline) = pipeline(5);
        shared.mark_dirty("p-ghost".to_string());

        let report = pipeline.push_pending().unwrap();
        assert_eq!(report.settled, 0);
        assert!(transport.pushed_batches().is_empty());
        assert_eq!(shared.ledger.lock().dirty_count(), 0);
    }

    #[test]
    fn cancellation_stops_the_push_loop() {
        let (shared, transport, pipeline) = pipeline(5);
        dirty_doc(&shared, doc("p-1", 30, 0));
        shared.cancel();

        assert!(matches!(
            pipeline.push_pending(),
            Err(EngineError::Cancelled)
        ));
        assert!(transport.pushed_batches().is_empty());
    }

    #[test]
    fn settle_updates_push_stats() {
        let (shared, transport, pipeline) = pipeline(5);
        dirty_doc(&shared, doc("p-1", 30, 0));
        dirty_doc(&shared, doc("p-2", 40, 0));
        transport.enqueue_push_conflicts(vec![doc("p-2", 44, 9_000)]);

        pipeline.push_pending().unwrap();
        let stats = shared.stats_snapshot();
        assert_eq!(stats.batches_pushed, 1);
        assert_eq!(stats.documents_pushed, 1);
        assert_eq!(stats.conflicts_absorbed, 1);
    }
}
