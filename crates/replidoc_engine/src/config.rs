//! Configuration for the replication engine.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Retry behavior for transient transport failures.
///
/// Delays grow exponentially from `initial_delay` up to `max_delay`.
/// Optional jitter spreads a fleet of replicas out so they do not
/// hammer a recovering master in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// How many attempts a bounded run makes before giving up.
    ///
    /// Live runs retry without bound and use this only to shape the
    /// backoff curve.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Adds up to 25% spread on top of each delay.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that fails on the first transport error.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            add_jitter: false,
            ..Self::default()
        }
    }

    /// Computes the backoff delay before the given retry attempt.
    ///
    /// `attempt` is 1-based: attempt 1 waits `initial_delay`, attempt 2
    /// waits `initial_delay * backoff_multiplier`, and so on, capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_millis() as f64;
        let scaled = base * self.backoff_multiplier.powi(exponent);
        let capped = (scaled as u64).min(self.max_delay.as_millis() as u64);
        let with_jitter = if self.add_jitter {
            capped + (capped as f64 * 0.25 * jitter_fraction()) as u64
        } else {
            capped
        };
        Duration::from_millis(with_jitter)
    }
}

/// Cheap jitter source in `[0, 1)`.
///
/// Derived from the wall clock's sub-second nanos, which is plenty for
/// de-synchronizing retry storms without pulling in an RNG crate.
fn jitter_fraction() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Tunables for a replication run.
///
/// Start from [`ReplicationConfig::new`] and chain the `with_*` builders:
///
/// ```
/// use replidoc_engine::ReplicationConfig;
/// use std::time::Duration;
///
/// let config = ReplicationConfig::new("people")
///     .with_push_batch_size(5)
///     .with_poll_interval(Duration::from_secs(5));
/// assert!(config.live);
/// ```
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Stable name of the replicated collection.
    ///
    /// Shared by every replica of the same dataset; it names the lease
    /// file used for leader election, so keep it filesystem-safe.
    pub identifier: String,
    /// Unique id of this engine instance, fresh per construction.
    pub replica_id: Uuid,
    /// Maximum documents requested per pull page.
    pub pull_batch_size: usize,
    /// Maximum change requests sent per push batch.
    pub push_batch_size: usize,
    /// Keep replicating after the initial catch-up.
    ///
    /// When false the engine performs one pull-then-push pass and stops.
    pub live: bool,
    /// Block until this instance holds the replication lease.
    ///
    /// When false the engine skips leader election entirely and starts
    /// replicating immediately, even if `lease_dir` is set.
    pub wait_for_leadership: bool,
    /// How often the pull loop polls when the transport has no live
    /// change stream.
    pub poll_interval: Duration,
    /// Backoff policy for transient transport failures.
    pub retry: RetryConfig,
    /// Directory holding the per-identifier lease file.
    ///
    /// `None` disables cross-process leader election.
    pub lease_dir: Option<PathBuf>,
    /// Where to persist the pull checkpoint between runs.
    ///
    /// `None` keeps the checkpoint in memory only; a restarted engine
    /// then re-pulls from the beginning, which is safe but slower.
    pub checkpoint_path: Option<PathBuf>,
}

impl ReplicationConfig {
    /// Creates a configuration with the default batch sizes and timing.
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            replica_id: Uuid::new_v4(),
            pull_batch_size: 10,
            push_batch_size: 5,
            live: true,
            wait_for_leadership: true,
            poll_interval: Duration::from_secs(5),
            retry: RetryConfig::default(),
            lease_dir: None,
            checkpoint_path: None,
        }
    }

    /// Sets the maximum documents per pull page.
    #[must_use]
    pub fn with_pull_batch_size(mut self, size: usize) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the maximum change requests per push batch.
    #[must_use]
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Enables or disables continuous replication.
    #[must_use]
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Configures a single pull-then-push pass.
    #[must_use]
    pub fn one_shot(self) -> Self {
        self.with_live(false)
    }

    /// Enables or disables waiting for the replication lease.
    #[must_use]
    pub fn with_wait_for_leadership(mut self, wait: bool) -> Self {
        self.wait_for_leadership = wait;
        self
    }

    /// Sets the polling interval used without a live change stream.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables cross-process leader election through lease files in `dir`.
    #[must_use]
    pub fn with_lease_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lease_dir = Some(dir.into());
        self
    }

    /// Persists the pull checkpoint at `path` across restarts.
    #[must_use]
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.identifier.trim().is_empty() {
            return Err(EngineError::Config("identifier must not be empty".into()));
        }
        if self.pull_batch_size == 0 {
            return Err(EngineError::Config("pull_batch_size must be at least 1".into()));
        }
        if self.push_batch_size == 0 {
            return Err(EngineError::Config("push_batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::new("replidoc")
    }
}
