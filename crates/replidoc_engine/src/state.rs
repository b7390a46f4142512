//! Observable state shared across the engine's threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use replidoc_protocol::Checkpoint;
use replidoc_storage::DocumentStore;

use crate::error::{EngineError, EngineResult};
use crate::ledger::ChangeLedger;

/// Lifecycle of a replication run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationStatus {
    /// Constructed, not started.
    Idle,
    /// Waiting to win the replication lease.
    AwaitingLeadership,
    /// Draining pull pages from the master.
    Pulling,
    /// Sending pending local changes.
    Pushing,
    /// Caught up and reacting to new changes.
    Live,
    /// Backing off after a transient failure.
    RetryWait,
    /// Finished or cancelled.
    Stopped,
    /// Gave up on a fatal error; the stats carry the message.
    Failed,
}

impl ReplicationStatus {
    /// Whether the engine is doing, or about to do, replication work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::AwaitingLeadership
                | Self::Pulling
                | Self::Pushing
                | Self::Live
                | Self::RetryWait
        )
    }

    /// Whether the run has ended.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Counters describing replication progress.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    /// Pull pages and stream batches applied.
    pub pages_pulled: u64,
    /// Documents whose local state changed through pull.
    pub documents_pulled: u64,
    /// Push batches settled with the master.
    pub batches_pushed: u64,
    /// Change requests the master accepted.
    pub documents_pushed: u64,
    /// Push conflicts resolved by adopting the master state.
    pub conflicts_absorbed: u64,
    /// Backoff retries across pull and push.
    pub retries: u64,
    /// When the last full sync cycle finished.
    pub last_cycle_time: Option<Instant>,
    /// Most recent error message, cleared by the next success.
    pub last_error: Option<String>,
}

/// State shared between the coordinator, its worker threads and the
/// application-facing handle.
pub(crate) struct SharedState {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) ledger: Mutex<ChangeLedger>,
    /// Signalled when a key turns dirty or cancellation starts.
    pub(crate) ledger_cv: Condvar,
    /// Serializes every local write. Pull application, push batch
    /// assembly and application edits are mutually exclusive, which is
    /// what keeps batches atomic from the application's point of view.
    pub(crate) write_gate: Mutex<()>,
    pub(crate) stats: RwLock<ReplicationStats>,
    checkpoint: RwLock<Option<Checkpoint>>,
    status: RwLock<ReplicationStatus>,
    cancelled: AtomicBool,
    park: Mutex<()>,
    park_cv: Condvar,
}

impl SharedState {
    pub(crate) fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            ledger: Mutex::new(ChangeLedger::new()),
            ledger_cv: Condvar::new(),
            write_gate: Mutex::new(()),
            stats: RwLock::new(ReplicationStats::default()),
            checkpoint: RwLock::new(None),
            status: RwLock::new(ReplicationStatus::Idle),
            cancelled: AtomicBool::new(false),
            park: Mutex::new(()),
            park_cv: Condvar::new(),
        }
    }

    pub(crate) fn status(&self) -> ReplicationStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: ReplicationStatus) {
        *self.status.write() = status;
    }

    pub(crate) fn stats_snapshot(&self) -> ReplicationStats {
        self.stats.read().clone()
    }

    pub(crate) fn record_failure(&self, error: &EngineError) {
        self.stats.write().last_error = Some(error.to_string());
    }

    pub(crate) fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint.read().clone()
    }

    /// Seeds the checkpoint from a persisted value before the run starts.
    pub(crate) fn restore_checkpoint(&self, checkpoint: Checkpoint) {
        *self.checkpoint.write() = Some(checkpoint);
    }

    /// Moves the checkpoint forward, never backward.
    ///
    /// Returns false when `candidate` does not lie strictly after the
    /// current cursor, which is how redelivered pages become no-ops.
    pub(crate) fn advance_checkpoint(&self, candidate: &Checkpoint) -> bool {
        let mut slot = self.checkpoint.write();
        match slot.as_ref() {
            Some(current) if !candidate.advances(current) => false,
            _ => {
                *slot = Some(candidate.clone());
                true
            }
        }
    }

    /// Flags a key dirty and wakes the push worker.
    pub(crate) fn mark_dirty(&self, passport_id: String) {
        self.ledger.lock().mark_dirty(passport_id);
        self.ledger_cv.notify_all();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check_cancelled(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Requests cancellation and wakes every sleeping worker.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Lock and drop before notifying so a thread between its flag
        // check and its wait cannot miss the wakeup.
        drop(self.park.lock());
        self.park_cv.notify_all();
        drop(self.ledger.lock());
        self.ledger_cv.notify_all();
    }

    pub(crate) fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Sleeps up to `timeout`, waking early on cancellation.
    pub(crate) fn park(&self, timeout: Duration) {
        let mut guard = self.park.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.park_cv.wait_for(&mut guard, timeout);
    }
}
