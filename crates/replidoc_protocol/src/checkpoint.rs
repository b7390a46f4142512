//! Resumable pull cursor.

use serde::{Deserialize, Serialize};

use crate::document::{iso_millis, Document, Revision};

/// A cursor marking how much of the master's change history a client has
/// consumed.
///
/// The position is the composite `(last_update, last_id)`, ordered by revision
/// first and primary key second. An absent checkpoint means "from the
/// beginning". Checkpoints only ever move forward for a given client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Revision of the last document the client applied.
    #[serde(with = "iso_millis")]
    pub last_update: Revision,
    /// Primary key of the last document applied, breaking revision ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
}

impl Checkpoint {
    /// Checkpoint positioned at the given document.
    pub fn for_document(document: &Document) -> Self {
        Self {
            last_update: document.updated,
            last_id: Some(document.passport_id.clone()),
        }
    }

    /// The composite comparison position. A missing id sorts before every
    /// real key, so `{T, None}` covers nothing stamped at `T`.
    pub fn position(&self) -> (Revision, &str) {
        (self.last_update, self.last_id.as_deref().unwrap_or(""))
    }

    /// True when the document lies at or before this checkpoint, i.e. a pull
    /// from here must not return it again.
    pub fn covers(&self, document: &Document) -> bool {
        (document.updated, document.passport_id.as_str()) <= self.position()
    }

    /// True when this checkpoint is strictly ahead of `other`.
    pub fn advances(&self, other: &Checkpoint) -> bool {
        self.position() > other.position()
    }
}
