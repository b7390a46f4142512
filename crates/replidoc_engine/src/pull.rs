//! Checkpointed pull and incremental apply.

use std::path::PathBuf;
use std::sync::Arc;

use replidoc_protocol::{Checkpoint, Document, PullStreamEvent};
use tracing::{debug, trace, warn};

use crate::checkpoint::save_checkpoint;
use crate::error::EngineResult;
use crate::state::SharedState;
use crate::transport::MasterTransport;

/// What one pull pass accomplished.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PullReport {
    pub(crate) pages: u64,
    pub(crate) documents: u64,
}

/// Drains committed changes from the master into the local store.
pub(crate) struct PullPipeline {
    shared: Arc<SharedState>,
    transport: Arc<dyn MasterTransport>,
    batch_size: usize,
    checkpoint_path: Option<PathBuf>,
}

impl PullPipeline {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        transport: Arc<dyn MasterTransport>,
        batch_size: usize,
        checkpoint_path: Option<PathBuf>,
    ) -> Self {
        Self {
            shared,
            transport,
            batch_size,
            checkpoint_path,
        }
    }

    /// Pulls pages from the current checkpoint until the master reports
    /// none are left.
    pub(crate) fn catch_up(&self) -> EngineResult<PullReport> {
        let mut report = PullReport::default();
        loop {
            self.shared.check_cancelled()?;
            let checkpoint = self.shared.checkpoint();
            let page = self.transport.pull(checkpoint.as_ref(), self.batch_size)?;
            if page.is_empty() {
                break;
            }
            debug!(documents = page.len(), "applying pull page");
            let (applied, advanced) = self.apply_batch(&page, None)?;
            report.pages += 1;
            report.documents += applied;
            if !advanced {
                // A page that does not move the cursor would repeat forever.
                warn!("pull page did not advance the checkpoint, stopping");
                break;
            }
        }
        Ok(report)
    }

    /// Applies one event from the master's live change stream.
    pub(crate) fn apply_stream_event(&self, event: &PullStreamEvent) -> EngineResult<u64> {
        let (applied, _) = self.apply_batch(&event.documents, Some(&event.checkpoint))?;
        Ok(applied)
    }

    /// Applies a batch of master records, then advances the checkpoint.
    ///
    /// The cursor moves only after every document in the batch landed,
    /// so an interruption in the middle re-pulls the same page and the
    /// idempotent per-document apply absorbs the repeats. Stream events
    /// carry their own cursor through `override_checkpoint`.
    fn apply_batch(
        &self,
        documents: &[Document],
        override_checkpoint: Option<&Checkpoint>,
    ) -> EngineResult<(u64, bool)> {
        let mut applied = 0u64;
        {
            let _gate = self.shared.write_gate.lock();
            for incoming in documents {
                if self.apply_document(incoming)? {
                    applied += 1;
                }
            }
        }

        let next = match override_checkpoint {
            Some(checkpoint) => Some(checkpoint.clone()),
            None => documents.last().map(Checkpoint::for_document),
        };
        let mut advanced = false;
        if let Some(next) = next {
            advanced = self.shared.advance_checkpoint(&next);
            if advanced {
                if let Some(path) = &self.checkpoint_path {
                    save_checkpoint(path, &next)?;
                }
            }
        }

        if applied > 0 || advanced {
            let mut stats = self.shared.stats.write();
            stats.pages_pulled += 1;
            stats.documents_pulled += applied;
        }
        Ok((applied, advanced))
    }

    /// Applies one incoming master record. Returns whether local state
    /// changed.
    ///
    /// Last-write-wins on the revision marker, with one refinement: a
    /// strictly newer record whose content matches the state this
    /// replica last confirmed is the master's re-stamp of our own
    /// settled push. That echo refreshes the local revision pin but
    /// keeps any edit made since, so the pending edit still reaches the
    /// master instead of being clobbered by its own predecessor.
    fn apply_document(&self, incoming: &Document) -> EngineResult<bool> {
        let mut ledger = self.shared.ledger.lock();
        let key = incoming.passport_id.as_str();
        let current = self.shared.store.get(key)?;

        let changed = match current {
            None => {
                self.shared.store.put(incoming.clone())?;
                trace!(key, "pulled new document");
                true
            }
            Some(current) => {
                if incoming.updated <= current.updated {
                    trace!(key, "pull skipped, local revision is not older");
                    false
                } else if ledger.is_dirty(key)
                    && ledger
                        .assumed(key)
                        .is_some_and(|known| known.same_content(incoming))
                {
                    let repinned = current.with_updated(incoming.updated);
                    self.shared.store.put(repinned)?;
                    trace!(key, "refreshed revision pin under a pending local edit");
                    true
                } else {
                    self.shared.store.put(incoming.clone())?;
                    if ledger.clear_dirty(key) {
                        debug!(key, "master overwrote a pending local edit");
                    }
                    true
                }
            }
        };
        ledger.confirm(incoming.clone());
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::transport::MockTransport;
    use chrono::{TimeZone, Utc};
    use replidoc_protocol::Revision;
    use replidoc_storage::{DocumentStore, MemoryStore};

    fn revision(millis: i64) -> Revision {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn doc(id: &str, age: u32, millis: i64) -> Document {
        Document::new(id, "Ada", "Lovelace", age).with_updated(revision(millis))
    }

    fn pipeline(
        checkpoint_path: Option<PathBuf>,
    ) -> (Arc<SharedState>, Arc<MockTransport>, PullPipeline) {
        let shared = Arc::new(SharedState::new(Arc::new(MemoryStore::new())));
        let transport = Arc::new(MockTransport::new());
        let pipeline = PullPipeline::new(
            Arc::clone(&shared),
            Arc::clone(&transport) as Arc<dyn MasterTransport>,
            10,
            checkpoint_path,
        );
        (shared, transport, pipeline)
    }

    #[test]
    fn catch_up_pages_until_empty_and_moves_the_cursor() {
        let (shared, transport, pipeline) = pipeline(None);
        transport.enqueue_pull_page(vec![doc("p-1", 30, 1_000), doc("p-2", 40, 2_000)]);
        transport.enqueue_pull_page(vec![doc("p-3", 50, 3_000)]);

        let report = pipeline.catch_up().unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.documents, 3);
        assert_eq!(shared.store.len().unwrap(), 3);

        let checkpoint = shared.checkpoint().unwrap();
        assert_eq!(checkpoint.last_update, revision(3_000));
        assert_eq!(checkpoint.last_id.as_deref(), Some("p-3"));

        // second and third pulls resumed from the applied pages
        let pulls = transport.pull_requests();
        assert_eq!(pulls.len(), 3);
        assert!(pulls[0].is_none());
        assert_eq!(pulls[1].as_ref().unwrap().last_id.as_deref(), Some("p-2"));
        assert_eq!(pulls[2].as_ref().unwrap().last_id.as_deref(), Some("p-3"));
    }

    #[test]
    fn redelivered_page_is_a_no_op() {
        let (shared, transport, pipeline) = pipeline(None);
        let page = vec![doc("p-1", 30, 1_000), doc("p-2", 40, 2_000)];
        transport.enqueue_pull_page(page.clone());
        transport.enqueue_pull_page(page);

        let report = pipeline.catch_up().unwrap();
        // the repeated page applies nothing and stops the loop
        assert_eq!(report.documents, 2);
        assert_eq!(shared.store.len().unwrap(), 2);
        assert_eq!(shared.stats_snapshot().documents_pulled, 2);
        assert_eq!(
            shared.checkpoint().unwrap().last_id.as_deref(),
            Some("p-2")
        );
    }

    #[test]
    fn newer_master_write_overwrites_and_clears_dirty() {
        let (shared, transport, pipeline) = pipeline(None);
        shared.store.put(doc("p-1", 30, 1_000)).unwrap();
        shared.mark_dirty("p-1".to_string());

        transport.enqueue_pull_page(vec![doc("p-1", 99, 5_000)]);
        pipeline.catch_up().unwrap();

        let stored = shared.store.get("p-1").unwrap().unwrap();
        assert_eq!(stored.age, 99);
        assert!(!shared.ledger.lock().is_dirty("p-1"));
    }

    #[test]
    fn equal_revision_redelivery_preserves_a_pending_edit() {
        let (shared, transport, pipeline) = pipeline(None);
        // local edit pinned at the master's current revision
        shared.store.put(doc("p-1", 31, 2_000)).unwrap();
        shared.mark_dirty("p-1".to_string());

        transport.enqueue_pull_page(vec![doc("p-1", 30, 2_000)]);
        pipeline.catch_up().unwrap();

        let stored = shared.store.get("p-1").unwrap().unwrap();
        assert_eq!(stored.age, 31, "pending edit must survive redelivery");
        assert!(shared.ledger.lock().is_dirty("p-1"));
    }

    #[test]
    fn own_echo_refreshes_the_pin_without_dropping_the_next_edit() {
        let (shared, transport, pipeline) = pipeline(None);
        // this replica pushed age 30 at revision 1000, the push settled,
        // and the user edited to age 31 before the echo arrived
        shared.ledger.lock().confirm(doc("p-1", 30, 1_000));
        shared.store.put(doc("p-1", 31, 1_000)).unwrap();
        shared.mark_dirty("p-1".to_string());

        // master's re-stamped echo of the settled push
        transport.enqueue_pull_page(vec![doc("p-1", 30, 4_000)]);
        pipeline.catch_up().unwrap();

        let stored = shared.store.get("p-1").unwrap().unwrap();
        assert_eq!(stored.age, 31, "local edit keeps its content");
        assert_eq!(stored.updated, revision(4_000), "pin moves to the echo");
        assert!(shared.ledger.lock().is_dirty("p-1"));
        assert_eq!(shared.ledger.lock().assumed("p-1").unwrap().age, 30);
    }

    #[test]
    fn stream_events_apply_with_their_own_cursor() {
        let (shared, _transport, pipeline) = pipeline(None);
        let event = PullStreamEvent {
            documents: vec![doc("p-1", 30, 1_000)],
            checkpoint: Checkpoint {
                last_update: revision(1_000),
                last_id: Some("p-1".to_string()),
            },
        };

        let applied = pipeline.apply_stream_event(&event).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(shared.checkpoint().unwrap(), event.checkpoint);

        // replaying the event changes nothing
        let applied = pipeline.apply_stream_event(&event).unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn checkpoint_is_persisted_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.checkpoint");
        let (shared, transport, pipeline) = pipeline(Some(path.clone()));

        transport.enqueue_pull_page(vec![doc("p-1", 30, 1_000)]);
        pipeline.catch_up().unwrap();

        let persisted = crate::checkpoint::load_checkpoint(&path).unwrap().unwrap();
        assert_eq!(Some(persisted), shared.checkpoint());
    }

    #[test]
    fn transport_errors_bubble_without_moving_the_cursor() {
        let (shared, transport, pipeline) = pipeline(None);
        transport.enqueue_pull_error(EngineError::transport_retryable("socket closed"));

        let err = pipeline.catch_up().unwrap_err();
        assert!(err.is_retryable());
        assert!(shared.checkpoint().is_none());
    }

    #[test]
    fn cancellation_stops_the_pull_loop() {
        let (shared, transport, pipeline) = pipeline(None);
        transport.enqueue_pull_page(vec![doc("p-1", 30, 1_000)]);
        shared.cancel();

        assert!(matches!(
            pipeline.catch_up(),
            Err(EngineError::Cancelled)
        ));
        assert_eq!(shared.store.len().unwrap(), 0);
    }

    #[test]
    fn tombstones_replicate_like_any_other_write() {
        let (shared, transport, pipeline) = pipeline(None);
        shared.store.put(doc("p-1", 30, 1_000)).unwrap();

        let mut tombstone = doc("p-1", 30, 2_000);
        tombstone.deleted = true;
        transport.enqueue_pull_page(vec![tombstone]);
        pipeline.catch_up().unwrap();

        let stored = shared.store.get("p-1").unwrap().unwrap();
        assert!(stored.deleted);
        assert!(shared.store.visible().unwrap().is_empty());
    }
}
