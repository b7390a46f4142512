//! Cross-process leader election through advisory file locks.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::EngineResult;

/// An exclusive replication lease for one collection identifier.
///
/// Backed by an advisory lock on `<dir>/<identifier>.lease`. Only one
/// process can hold the lease at a time; the lock is released when the
/// lease is dropped or the owning process exits, so a crashed leader
/// never wedges the remaining replicas.
#[derive(Debug)]
pub struct ReplicaLease {
    path: PathBuf,
    _lock_file: File,
}

impl ReplicaLease {
    /// Tries to take the lease without blocking.
    ///
    /// Returns `None` when another process already holds it. The lease
    /// directory is created if missing.
    pub fn try_acquire(dir: &Path, identifier: &str) -> EngineResult<Option<Self>> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{identifier}.lease"));
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if lock_file.try_lock_exclusive().is_err() {
            debug!(lease = %path.display(), "replication lease held elsewhere");
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            _lock_file: lock_file,
        }))
    }

    /// Path of the lease file backing this lease.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
