//! Revision stamping for accepted master writes.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use replidoc_protocol::{epoch, Revision};

/// Source of the master-owned `updated` revision markers.
///
/// Revision equality is the protocol's whole optimistic-concurrency check, so
/// stamps must never repeat and never regress, even if the wall clock jumps
/// backwards. `next` returns the current time when it is ahead of the last
/// stamp and `last + 1ms` otherwise.
///
/// Stamps are truncated to millisecond precision; the wire format carries
/// milliseconds, and a record that round-trips through it must still compare
/// equal to the stored one.
#[derive(Debug)]
pub struct RevisionClock {
    last: Mutex<Revision>,
}

impl RevisionClock {
    /// Creates a clock with no stamps issued yet.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(epoch()),
        }
    }

    /// Issues the next revision, strictly greater than every earlier one.
    pub fn next(&self) -> Revision {
        let mut last = self.last.lock();
        let now = now_millis();
        let stamp = if now > *last {
            now
        } else {
            *last + Duration::milliseconds(1)
        };
        *last = stamp;
        stamp
    }

    /// Raises the clock floor to `revision` if it lies ahead.
    ///
    /// Used when records with externally supplied revisions are seeded, so
    /// later stamps still sort after them.
    pub fn observe(&self, revision: Revision) {
        let mut last = self.last.lock();
        if revision > *last {
            *last = revision;
        }
    }

    /// The most recent stamp issued or observed.
    pub fn last(&self) -> Revision {
        *self.last.lock()
    }
}

impl Default for RevisionClock {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> Revision {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
