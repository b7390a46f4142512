//! Fan-out of accepted writes to live pull subscribers.

use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use replidoc_protocol::PullStreamEvent;
use tracing::debug;

/// Delivers one [`PullStreamEvent`] per accepted batch to every subscriber.
///
/// Subscribers are plain `mpsc` receivers; a subscriber that hangs up is
/// pruned on the next publish. Events for a given subscriber arrive in master
/// commit order.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    subscribers: Mutex<Vec<Sender<PullStreamEvent>>>,
}

impl ChangeNotifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> Receiver<PullStreamEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Sends the event to every live subscriber, dropping dead ones.
    pub fn publish(&self, event: &PullStreamEvent) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        let pruned = before - subscribers.len();
        if pruned > 0 {
            debug!(pruned, "dropped disconnected stream subscribers");
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
