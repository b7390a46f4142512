//! Replication lifecycle coordination.
//!
//! [`Replication`] owns the background threads: a supervisor that waits
//! for the lease, runs the initial pull-then-push cycle and then keeps
//! the replica live, plus a push worker that drains local changes as
//! they happen. All of it winds down through one cancellation flag, so
//! shutdown never leaves a batch half-applied.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use replidoc_protocol::{Checkpoint, PullStreamEvent};
use replidoc_storage::DocumentStore;
use tracing::{debug, error, info, warn};

use crate::checkpoint::load_checkpoint;
use crate::config::ReplicationConfig;
use crate::error::{EngineError, EngineResult};
use crate::handle::ReplicaHandle;
use crate::lease::ReplicaLease;
use crate::pull::{PullPipeline, PullReport};
use crate::push::{PushPipeline, PushReport};
use crate::state::{ReplicationStats, ReplicationStatus, SharedState};
use crate::transport::MasterTransport;

/// How often a waiting replica re-checks the lease.
const LEASE_POLL: Duration = Duration::from_millis(500);

/// Summary of one completed sync cycle.
#[derive(Debug, Clone, Copy)]
pub struct SyncReport {
    /// Documents whose local state changed through pull.
    pub pulled: u64,
    /// Change requests the master accepted.
    pub pushed: u64,
    /// Push conflicts resolved by adopting the master state.
    pub conflicts: u64,
    /// Wall time of the cycle, including retries.
    pub duration: Duration,
}

#[derive(Debug, Clone)]
enum InitialState {
    Pending,
    Done,
    Failed(String),
    Cancelled,
}

/// One-shot gate the supervisor opens after the first full cycle.
struct InitialGate {
    state: Mutex<InitialState>,
    cv: Condvar,
}

impl InitialGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(InitialState::Pending),
            cv: Condvar::new(),
        }
    }

    fn reset(&self) {
        *self.state.lock() = InitialState::Pending;
    }

    fn complete(&self) {
        self.transition(InitialState::Done);
    }

    fn fail(&self, message: String) {
        self.transition(InitialState::Failed(message));
    }

    fn cancel(&self) {
        self.transition(InitialState::Cancelled);
    }

    /// First transition wins; later ones are ignored.
    fn transition(&self, next: InitialState) {
        let mut state = self.state.lock();
        if matches!(*state, InitialState::Pending) {
            *state = next;
            self.cv.notify_all();
        }
    }

    fn wait(&self) -> InitialState {
        let mut state = self.state.lock();
        while matches!(*state, InitialState::Pending) {
            self.cv.wait(&mut state);
        }
        state.clone()
    }
}

/// Drives replication of one collection against a master.
///
/// Construction wires a local store and a transport together; nothing
/// touches the network until [`start`] or [`sync_once`]. A started
/// engine runs on background threads until [`cancel`], which also runs
/// on drop.
///
/// [`start`]: Replication::start
/// [`sync_once`]: Replication::sync_once
/// [`cancel`]: Replication::cancel
pub struct Replication {
    config: ReplicationConfig,
    shared: Arc<SharedState>,
    transport: Arc<dyn MasterTransport>,
    pull: Arc<PullPipeline>,
    push: Arc<PushPipeline>,
    initial: Arc<InitialGate>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Replication {
    /// Wires an engine together.
    ///
    /// Loads the persisted checkpoint when the config names one, so a
    /// restarted replica resumes where it left off instead of
    /// re-pulling everything.
    pub fn new(
        config: ReplicationConfig,
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn MasterTransport>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let shared = Arc::new(SharedState::new(store));
        if let Some(path) = &config.checkpoint_path {
            if let Some(checkpoint) = load_checkpoint(path)? {
                debug!(last_id = ?checkpoint.last_id, "resuming from persisted checkpoint");
                shared.restore_checkpoint(checkpoint);
            }
        }

        let pull = Arc::new(PullPipeline::new(
            Arc::clone(&shared),
            Arc::clone(&transport),
            config.pull_batch_size,
            config.checkpoint_path.clone(),
        ));
        let push = Arc::new(PushPipeline::new(
            Arc::clone(&shared),
            Arc::clone(&transport),
            config.push_batch_size,
        ));

        Ok(Self {
            config,
            shared,
            transport,
            pull,
            push,
            initial: Arc::new(InitialGate::new()),
            worker: Mutex::new(None),
        })
    }

    /// Handle for local reads and writes.
    #[must_use]
    pub fn handle(&self) -> ReplicaHandle {
        ReplicaHandle::new(Arc::clone(&self.shared))
    }

    /// The collection identifier this engine replicates.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ReplicationStatus {
        self.shared.status()
    }

    /// Snapshot of the progress counters.
    #[must_use]
    pub fn stats(&self) -> ReplicationStats {
        self.shared.stats_snapshot()
    }

    /// The current pull cursor.
    #[must_use]
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.shared.checkpoint()
    }

    /// Starts replication on a background thread.
    ///
    /// The thread waits for the lease when one is configured, runs the
    /// initial pull-then-push cycle, and then either stops
    /// (`live = false`) or keeps reacting to changes until [`cancel`].
    ///
    /// [`cancel`]: Replication::cancel
    pub fn start(&self) -> EngineResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(EngineError::Config("replication already started".into()));
        }
        self.shared.reset_cancel();
        self.initial.reset();

        let supervisor = self.supervisor();
        let handle = thread::Builder::new()
            .name(format!("replidoc-{}", self.config.identifier))
            .spawn(move || supervisor.run())?;
        *worker = Some(handle);
        Ok(())
    }

    /// Blocks until the initial cycle finished, failed or was cancelled.
    pub fn await_initial_replication(&self) -> EngineResult<()> {
        match self.initial.wait() {
            InitialState::Done => Ok(()),
            InitialState::Failed(message) => Err(EngineError::InitialSync(message)),
            InitialState::Cancelled | InitialState::Pending => Err(EngineError::Cancelled),
        }
    }

    /// Runs one bounded pull-then-push cycle on the calling thread.
    ///
    /// Transient failures are retried per the retry policy, then given
    /// up on. Refuses to run next to a started worker because both
    /// would fight over the same cursor.
    pub fn sync_once(&self) -> EngineResult<SyncReport> {
        if self.worker.lock().is_some() {
            return Err(EngineError::Config(
                "cannot sync_once while the replication worker runs".into(),
            ));
        }
        self.shared.reset_cancel();

        let supervisor = self.supervisor();
        let _lease = supervisor.acquire_leadership()?;
        let report = supervisor.initial_cycle(true);
        match &report {
            Ok(_) => self.shared.set_status(ReplicationStatus::Idle),
            Err(EngineError::Cancelled) => self.shared.set_status(ReplicationStatus::Stopped),
            Err(err) => {
                self.shared.record_failure(err);
                self.shared.set_status(ReplicationStatus::Failed);
            }
        }
        report
    }

    /// Requests shutdown and joins the background threads.
    ///
    /// An in-flight push batch settles or is requeued as a unit;
    /// nothing is left half-applied. Safe to call more than once.
    pub fn cancel(&self) {
        self.shared.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("replication worker panicked during shutdown");
            }
        }
        self.initial.cancel();
    }

    fn supervisor(&self) -> Supervisor {
        Supervisor {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            pull: Arc::clone(&self.pull),
            push: Arc::clone(&self.push),
            initial: Arc::clone(&self.initial),
        }
    }
}

impl Drop for Replication {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The background half of a [`Replication`].
struct Supervisor {
    config: ReplicationConfig,
    shared: Arc<SharedState>,
    transport: Arc<dyn MasterTransport>,
    pull: Arc<PullPipeline>,
    push: Arc<PushPipeline>,
    initial: Arc<InitialGate>,
}

impl Supervisor {
    fn run(self) {
        let _lease = match self.acquire_leadership() {
            Ok(lease) => lease,
            Err(EngineError::Cancelled) => {
                self.initial.cancel();
                self.shared.set_status(ReplicationStatus::Stopped);
                return;
            }
            Err(err) => {
                error!(%err, "could not acquire the replication lease");
                self.shared.record_failure(&err);
                self.initial.fail(err.to_string());
                self.shared.set_status(ReplicationStatus::Failed);
                return;
            }
        };

        // Subscribe before catching up so no committed batch can fall
        // between the initial pull and the live stream; buffered
        // overlap is absorbed by the idempotent apply.
        let stream = if self.config.live {
            match self.transport.subscribe() {
                Ok(stream) => Some(stream),
                Err(EngineError::StreamUnavailable) => None,
                Err(err) => {
                    warn!(%err, "subscribe failed, will poll instead");
                    None
                }
            }
        } else {
            None
        };

        match self.initial_cycle(!self.config.live) {
            Ok(report) => {
                info!(
                    pulled = report.pulled,
                    pushed = report.pushed,
                    conflicts = report.conflicts,
                    "initial replication complete"
                );
                self.initial.complete();
            }
            Err(EngineError::Cancelled) => {
                self.push.abandon_in_flight();
                self.initial.cancel();
                self.shared.set_status(ReplicationStatus::Stopped);
                return;
            }
            Err(err) => {
                error!(%err, "initial replication failed");
                self.push.abandon_in_flight();
                self.shared.record_failure(&err);
                self.initial.fail(err.to_string());
                self.shared.set_status(ReplicationStatus::Failed);
                return;
            }
        }

        if !self.config.live {
            self.shared.set_status(ReplicationStatus::Stopped);
            return;
        }

        self.live_phase(stream);

        self.push.abandon_in_flight();
        if self.shared.status() != ReplicationStatus::Failed {
            self.shared.set_status(ReplicationStatus::Stopped);
        }
    }

    /// Waits for the replication lease, if leader election is enabled.
    fn acquire_leadership(&self) -> EngineResult<Option<ReplicaLease>> {
        let Some(dir) = &self.config.lease_dir else {
            return Ok(None);
        };
        if !self.config.wait_for_leadership {
            debug!("leader election skipped by configuration");
            return Ok(None);
        }

        self.shared.set_status(ReplicationStatus::AwaitingLeadership);
        loop {
            self.shared.check_cancelled()?;
            if let Some(lease) = ReplicaLease::try_acquire(dir, &self.config.identifier)? {
                info!(identifier = %self.config.identifier, "acquired the replication lease");
                return Ok(Some(lease));
            }
            self.shared.park(LEASE_POLL);
        }
    }

    /// Runs pull-then-push until it succeeds, retrying transient
    /// failures with backoff.
    ///
    /// `bounded` caps attempts at the retry policy's `max_attempts`;
    /// a live engine keeps trying with capped delays instead.
    fn initial_cycle(&self, bounded: bool) -> EngineResult<SyncReport> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            self.shared.check_cancelled()?;
            match self.try_cycle() {
                Ok((pull, push)) => {
                    let mut stats = self.shared.stats.write();
                    stats.last_cycle_time = Some(Instant::now());
                    stats.last_error = None;
                    return Ok(SyncReport {
                        pulled: pull.documents,
                        pushed: push.settled,
                        conflicts: push.conflicts,
                        duration: started.elapsed(),
                    });
                }
                Err(err) if err.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    if bounded && attempt >= self.config.retry.max_attempts {
                        return Err(err);
                    }
                    warn!(%err, attempt, "sync cycle failed, backing off");
                    self.shared.record_failure(&err);
                    self.shared.stats.write().retries += 1;
                    self.shared.set_status(ReplicationStatus::RetryWait);
                    self.shared.park(self.config.retry.delay_for_attempt(attempt));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_cycle(&self) -> EngineResult<(PullReport, PushReport)> {
        self.shared.set_status(ReplicationStatus::Pulling);
        let pull = self.pull.catch_up()?;
        self.shared.set_status(ReplicationStatus::Pushing);
        let push = self.push.push_pending()?;
        Ok((pull, push))
    }

    /// Keeps the replica converged until cancellation or a fatal error.
    fn live_phase(&self, stream: Option<Receiver<PullStreamEvent>>) {
        let pusher = match self.spawn_push_worker() {
            Ok(handle) => handle,
            Err(err) => {
                error!(%err, "could not spawn the push worker");
                self.shared.record_failure(&err);
                self.shared.set_status(ReplicationStatus::Failed);
                return;
            }
        };

        self.shared.set_status(ReplicationStatus::Live);
        match stream {
            Some(stream) => {
                debug!("consuming the live change stream");
                self.consume_stream(&stream);
            }
            None => {
                debug!("no live change stream, polling the master");
                self.poll_loop();
            }
        }

        // live only ends on cancellation or a fatal error; either way
        // the push worker has to come down with us
        self.shared.cancel();
        if pusher.join().is_err() {
            error!("push worker panicked");
        }
    }

    fn spawn_push_worker(&self) -> EngineResult<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let push = Arc::clone(&self.push);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(format!("replidoc-push-{}", self.config.identifier))
            .spawn(move || push_worker(&shared, &push, &config))?;
        Ok(handle)
    }

    /// Applies stream events until cancellation or stream loss.
    fn consume_stream(&self, stream: &Receiver<PullStreamEvent>) {
        loop {
            if self.shared.is_cancelled() {
                return;
            }
            match stream.recv_timeout(self.config.poll_interval) {
                Ok(event) => {
                    debug!(documents = event.documents.len(), "live change batch");
                    match self.pull.apply_stream_event(&event) {
                        Ok(_) => {}
                        Err(EngineError::Cancelled) => return,
                        Err(err) => {
                            // stream apply failures are local (storage,
                            // codec) and will not heal by themselves
                            error!(%err, "failed to apply a live change batch");
                            self.shared.record_failure(&err);
                            self.shared.set_status(ReplicationStatus::Failed);
                            return;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("live change stream closed, falling back to polling");
                    self.poll_loop();
                    return;
                }
            }
        }
    }

    /// Pulls at the configured interval when no stream is available.
    fn poll_loop(&self) {
        let mut attempt: u32 = 0;
        loop {
            if self.shared.is_cancelled() {
                return;
            }
            match self.pull.catch_up() {
                Ok(_) => {
                    attempt = 0;
                    self.shared.park(self.config.poll_interval);
                }
                Err(EngineError::Cancelled) => return,
                Err(err) if err.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    warn!(%err, attempt, "poll pull failed, backing off");
                    self.shared.record_failure(&err);
                    self.shared.stats.write().retries += 1;
                    self.shared.park(self.config.retry.delay_for_attempt(attempt));
                }
                Err(err) => {
                    error!(%err, "pull failed fatally, stopping replication");
                    self.shared.record_failure(&err);
                    self.shared.set_status(ReplicationStatus::Failed);
                    return;
                }
            }
        }
    }
}

/// Waits for dirty keys and drains them, backing off on transient
/// failures. Exits on cancellation or a fatal push error; a fatal error
/// leaves pulls running so the replica at least stays read-consistent.
fn push_worker(shared: &SharedState, push: &PushPipeline, config: &ReplicationConfig) {
    loop {
        {
            let mut ledger = shared.ledger.lock();
            while !shared.is_cancelled() && ledger.dirty_count() == 0 && !push.has_in_flight() {
                let _ = shared.ledger_cv.wait_for(&mut ledger, config.poll_interval);
            }
        }
        if shared.is_cancelled() {
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            match push.push_pending() {
                Ok(report) => {
                    if report.settled + report.conflicts > 0 {
                        debug!(
                            settled = report.settled,
                            conflicts = report.conflicts,
                            "pushed pending changes"
                        );
                    }
                    break;
                }
                Err(EngineError::Cancelled) => return,
                Err(err) if err.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    warn!(%err, attempt, "push failed, backing off");
                    shared.record_failure(&err);
                    shared.stats.write().retries += 1;
                    shared.park(config.retry.delay_for_attempt(attempt));
                    if shared.is_cancelled() {
                        return;
                    }
                }
                Err(err) => {
                    error!(%err, "push failed fatally, push worker exiting");
                    shared.record_failure(&err);
                    push.abandon_in_flight();
                    return;
                }
            }
        }
    }
}
