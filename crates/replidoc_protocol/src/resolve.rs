//! The conflict resolver: a pure decision over assumed vs actual master state.

use crate::document::{Document, MasterRecord};

/// Outcome of resolving one change request against current master state.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// No master record existed; the write lands as a create.
    AcceptCreate,
    /// The client's assumption matched the master record; the write lands as
    /// an update.
    AcceptUpdate,
    /// The client's assumption was stale. Carries the current master record;
    /// the client must adopt it as local truth. No write happens.
    Conflict(MasterRecord),
}

impl PushOutcome {
    /// True for either accept variant.
    pub fn is_accept(&self) -> bool {
        !matches!(self, PushOutcome::Conflict(_))
    }
}

/// Decides whether a proposed write may land.
///
/// The comparison is on the `updated` revision marker only; business fields
/// are never diffed. Server-wins by construction: a stale basis loses and is
/// handed the current master record, and retrying requires a fresh local
/// write on top of it.
///
/// An assumed state with no surviving master record (the master was reset
/// since the client last pulled) is accepted as a create; a conflict has no
/// current truth to carry in that case.
pub fn resolve(assumed: Option<&Document>, current: Option<&MasterRecord>) -> PushOutcome {
    match (assumed, current) {
        (None, None) => PushOutcome::AcceptCreate,
        (None, Some(master)) => PushOutcome::Conflict(master.clone()),
        (Some(_), None) => PushOutcome::AcceptCreate,
        (Some(assumed), Some(master)) => {
            if assumed.same_revision(master) {
                PushOutcome::AcceptUpdate
            } else {
                PushOutcome::Conflict(master.clone())
            }
        }
    }
}
