//! Transport abstraction between a replica and its master.

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;

use parking_lot::Mutex;
use replidoc_protocol::{ChangeRequest, Checkpoint, Document, MasterRecord, PullStreamEvent};

use crate::error::{EngineError, EngineResult};

/// Network face of the master, as seen by one replica.
///
/// This trait abstracts the wire, allowing different implementations
/// (HTTP, in-process loopback, mock for testing). All methods are called
/// from the engine's worker threads, so implementations must be
/// `Send + Sync`.
pub trait MasterTransport: Send + Sync {
    /// Fetches the next page of committed changes after `checkpoint`.
    ///
    /// An empty page means the replica has caught up.
    fn pull(&self, checkpoint: Option<&Checkpoint>, limit: usize) -> EngineResult<Vec<Document>>;

    /// Sends a batch of change requests and returns the conflicts.
    ///
    /// An empty response means every request in the batch was accepted.
    fn push(&self, requests: &[ChangeRequest]) -> EngineResult<Vec<MasterRecord>>;

    /// Opens a live stream of committed change batches.
    ///
    /// The default implementation reports
    /// [`EngineError::StreamUnavailable`]; the engine then falls back to
    /// interval polling.
    fn subscribe(&self) -> EngineResult<Receiver<PullStreamEvent>> {
        Err(EngineError::StreamUnavailable)
    }
}

/// A scripted transport for tests.
///
/// Queued pull pages and push responses are consumed front to back.
/// Once a queue runs dry the mock answers with an empty page or an
/// empty conflict list. Every call is recorded so tests can assert on
/// exactly what the engine sent.
#[derive(Debug, Default)]
pub struct MockTransport {
    pull_pages: Mutex<VecDeque<EngineResult<Vec<Document>>>>,
    push_results: Mutex<VecDeque<EngineResult<Vec<MasterRecord>>>>,
    pulls: Mutex<Vec<Option<Checkpoint>>>,
    pushes: Mutex<Vec<Vec<ChangeRequest>>>,
    stream: Mutex<Option<Receiver<PullStreamEvent>>>,
}

impl MockTransport {
    /// Creates an empty mock. Pulls return empty pages and pushes
    /// report no conflicts until responses are queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a pull page.
    pub fn enqueue_pull_page(&self, page: Vec<Document>) {
        self.pull_pages.lock().push_back(Ok(page));
    }

    /// Queues a pull failure.
    pub fn enqueue_pull_error(&self, error: EngineError) {
        self.pull_pages.lock().push_back(Err(error));
    }

    /// Queues a push response carrying the given conflicts.
    pub fn enqueue_push_conflicts(&self, conflicts: Vec<MasterRecord>) {
        self.push_results.lock().push_back(Ok(conflicts));
    }

    /// Queues a push failure.
    pub fn enqueue_push_error(&self, error: EngineError) {
        self.push_results.lock().push_back(Err(error));
    }

    /// Hands the mock a live stream to return from [`subscribe`].
    ///
    /// [`subscribe`]: MasterTransport::subscribe
    pub fn set_stream(&self, stream: Receiver<PullStreamEvent>) {
        *self.stream.lock() = Some(stream);
    }

    /// The checkpoints the engine pulled with, in call order.
    #[must_use]
    pub fn pull_requests(&self) -> Vec<Option<Checkpoint>> {
        self.pulls.lock().clone()
    }

    /// The batches the engine pushed, in call order.
    #[must_use]
    pub fn pushed_batches(&self) -> Vec<Vec<ChangeRequest>> {
        self.pushes.lock().clone()
    }
}

impl MasterTransport for MockTransport {
    fn pull(&self, checkpoint: Option<&Checkpoint>, _limit: usize) -> EngineResult<Vec<Document>> {
        self.pulls.lock().push(checkpoint.cloned());
        match self.pull_pages.lock().pop_front() {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }

    fn push(&self, requests: &[ChangeRequest]) -> EngineResult<Vec<MasterRecord>> {
        self.pushes.lock().push(requests.to_vec());
        match self.push_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }

    fn subscribe(&self) -> EngineResult<Receiver<PullStreamEvent>> {
        self.stream.lock().take().ok_or(EngineError::StreamUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replidoc_protocol::Document;

    #[test]
    fn scripted_pages_come_back_in_order() {
        let transport = MockTransport::new();
        transport.enqueue_pull_page(vec![Document::new("p-1", "Ada", "Lovelace", 36)]);
        transport.enqueue_pull_page(vec![]);

        let first = transport.pull(None, 10).unwrap();
        assert_eq!(first.len(), 1);
        assert!(transport.pull(None, 10).unwrap().is_empty());
        // queue exhausted, still answers with an empty page
        assert!(transport.pull(None, 10).unwrap().is_empty());
        assert_eq!(transport.pull_requests().len(), 3);
    }

    #[test]
    fn pushes_are_recorded() {
        let transport = MockTransport::new();
        let request = ChangeRequest::create(Document::new("p-1", "Ada", "Lovelace", 36));
        let conflicts = transport.push(std::slice::from_ref(&request)).unwrap();
        assert!(conflicts.is_empty());

        let batches = transport.pushed_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].key(), "p-1");
    }

    #[test]
    fn scripted_errors_surface() {
        let transport = MockTransport::new();
        transport.enqueue_push_error(EngineError::transport_retryable("socket closed"));
        let err = transport.push(&[]).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn stream_is_handed_out_once() {
        let transport = MockTransport::new();
        let (_tx, rx) = std::sync::mpsc::channel();
        transport.set_stream(rx);
        assert!(transport.subscribe().is_ok());
        assert!(matches!(
            transport.subscribe(),
            Err(EngineError::StreamUnavailable)
        ));
    }
}
