//! Push and pull message bodies.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::document::Document;

/// One unit of a push batch: the client's proposed state plus the master
/// state that proposal was based on.
///
/// `assumed_master_state` is absent exactly when the client believes it is
/// creating the document; otherwise it is the last master record the client
/// observed for that key before editing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    /// Last master state the client saw, `None` for a believed create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumed_master_state: Option<Document>,
    /// The state the client wants the master to adopt.
    pub new_document_state: Document,
}

impl ChangeRequest {
    /// Request for a document the client believes is new.
    pub fn create(document: Document) -> Self {
        Self {
            assumed_master_state: None,
            new_document_state: document,
        }
    }

    /// Request for an edit on top of previously observed master state.
    pub fn update(assumed: Document, document: Document) -> Self {
        Self {
            assumed_master_state: Some(assumed),
            new_document_state: document,
        }
    }

    /// Primary key this request targets.
    pub fn key(&self) -> &str {
        &self.new_document_state.passport_id
    }
}

/// Batch of accepted master writes emitted on the live change stream.
///
/// The checkpoint is carried in-band so stream consumers advance their cursor
/// exactly as polling consumers do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullStreamEvent {
    /// Documents in master commit order.
    pub documents: Vec<Document>,
    /// Position of the last document in `documents`.
    pub checkpoint: Checkpoint,
}
