//! Typed request handlers for the master's HTTP surface.

use std::sync::Arc;

use replidoc_protocol::{validate_document, ChangeRequest, Checkpoint, Document, MasterRecord};

use crate::config::MasterConfig;
use crate::error::{MasterError, MasterResult};
use crate::store::MasterStore;

/// Parsed query parameters of a pull request.
#[derive(Debug, Clone, Default)]
pub struct PullQuery {
    /// Resume position; `None` pulls from the beginning.
    pub checkpoint: Option<Checkpoint>,
    /// Requested page size; clamped to the configured maximum.
    pub limit: Option<usize>,
}

/// Handler for master requests, enforcing the boundary contract before any
/// conflict logic runs.
pub struct RequestHandler {
    master: Arc<MasterStore>,
    config: MasterConfig,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(master: Arc<MasterStore>, config: MasterConfig) -> Self {
        Self { master, config }
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, query: PullQuery) -> MasterResult<Vec<MasterRecord>> {
        let limit = query
            .limit
            .unwrap_or(self.config.max_pull_batch)
            .min(self.config.max_pull_batch);
        self.master.fetch_since(query.checkpoint.as_ref(), limit)
    }

    /// Handles a push batch.
    ///
    /// Oversized batches are rejected outright; invalid documents inside an
    /// accepted batch are skipped per entry by the store.
    pub fn handle_push(&self, requests: Vec<ChangeRequest>) -> MasterResult<Vec<MasterRecord>> {
        if requests.len() > self.config.max_push_batch {
            return Err(MasterError::InvalidRequest(format!(
                "push batch too large: {} > {}",
                requests.len(),
                self.config.max_push_batch
            )));
        }
        self.master.apply_change_batch(requests)
    }

    /// Handles a reset request.
    pub fn handle_reset(&self) -> MasterResult<()> {
        self.master.reset()
    }

    /// Handles a direct upsert. Unlike pushed batch entries, an invalid
    /// document here is a synchronous error.
    pub fn handle_set_person(&self, document: Document) -> MasterResult<()> {
        validate_document(&document)?;
        self.master.upsert_unchecked(document)
    }
}
