//! HTTP transport for talking to a master node.
//!
//! The engine does not bundle an HTTP stack. Applications implement
//! [`HttpClient`] over whatever client library they already carry and
//! hand it to [`HttpTransport`], which maps the master's routes onto
//! the [`MasterTransport`] trait. [`LoopbackClient`] short-circuits the
//! same path onto an in-process endpoint for tests and simulations.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::SecondsFormat;
use parking_lot::RwLock;
use replidoc_protocol::{ChangeRequest, Checkpoint, Document, MasterRecord};

use crate::error::{EngineError, EngineResult};
use crate::transport::MasterTransport;

/// Minimal HTTP client surface the transport needs.
///
/// Errors are plain strings and are treated as retryable transport
/// failures; the engine's backoff loop decides when to try again.
pub trait HttpClient: Send + Sync {
    /// Performs a GET request and returns the response body.
    fn get(&self, url: &str) -> Result<Vec<u8>, String>;

    /// Performs a POST request with a JSON body and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Cheap health probe, consulted by [`HttpTransport::is_connected`].
    fn is_healthy(&self) -> bool {
        true
    }
}

/// [`MasterTransport`] over the master's HTTP surface.
///
/// Pull pages come from `GET {base}/pull`, pushes go to
/// `POST {base}/push/change` by default, and every body is JSON. The
/// transport keeps a connectivity flag and the last transport error for
/// status reporting; it never gates requests on the flag, so a master
/// that comes back is picked up by the next retry.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    push_path: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport rooted at `base_url`.
    ///
    /// Trailing slashes are trimmed so route concatenation stays clean.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            push_path: "/push/change".to_string(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Overrides the push route, e.g. `/push/no-change` for a master
    /// that acknowledges without applying.
    #[must_use]
    pub fn with_push_path(mut self, path: impl Into<String>) -> Self {
        self.push_path = path.into();
        self
    }

    /// The base URL requests are built against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the last request succeeded and the client reports healthy.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// The most recent transport error, if the last request failed.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn pull_url(&self, checkpoint: Option<&Checkpoint>, limit: usize) -> String {
        let mut url = format!("{}/pull?limit={limit}", self.base_url);
        if let Some(checkpoint) = checkpoint {
            let stamp = checkpoint
                .last_update
                .to_rfc3339_opts(SecondsFormat::Millis, true);
            url.push_str("&lastUpdate=");
            url.push_str(&urlencoding::encode(&stamp));
            if let Some(last_id) = &checkpoint.last_id {
                url.push_str("&lastId=");
                url.push_str(&urlencoding::encode(last_id));
            }
        }
        url
    }

    fn complete(&self, result: Result<Vec<u8>, String>) -> EngineResult<Vec<u8>> {
        match result {
            Ok(body) => {
                self.connected.store(true, Ordering::SeqCst);
                *self.last_error.write() = None;
                Ok(body)
            }
            Err(message) => {
                self.connected.store(false, Ordering::SeqCst);
                *self.last_error.write() = Some(message.clone());
                Err(EngineError::transport_retryable(message))
            }
        }
    }
}

impl<C: HttpClient> MasterTransport for HttpTransport<C> {
    fn pull(&self, checkpoint: Option<&Checkpoint>, limit: usize) -> EngineResult<Vec<Document>> {
        let url = self.pull_url(checkpoint, limit);
        let body = self.complete(self.client.get(&url))?;
        serde_json::from_slice(&body)
            .map_err(|err| EngineError::Protocol(format!("malformed pull page: {err}")))
    }

    fn push(&self, requests: &[ChangeRequest]) -> EngineResult<Vec<MasterRecord>> {
        let body = serde_json::to_vec(requests)?;
        let url = format!("{}{}", self.base_url, self.push_path);
        let response = self.complete(self.client.post(&url, body))?;
        serde_json::from_slice(&response)
            .map_err(|err| EngineError::Protocol(format!("malformed push response: {err}")))
    }
}

/// Serves a transport's requests without a network.
///
/// Implemented by anything that can answer the master's routes in
/// process. The request target keeps its query string.
pub trait LoopbackEndpoint: Send + Sync {
    /// Handles one request against a path-and-query target.
    fn handle(&self, method: &str, target: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// [`HttpClient`] that dispatches straight to a [`LoopbackEndpoint`].
pub struct LoopbackClient<E: LoopbackEndpoint> {
    endpoint: E,
}

impl<E: LoopbackEndpoint> LoopbackClient<E> {
    /// Wraps an in-process endpoint.
    pub fn new(endpoint: E) -> Self {
        Self { endpoint }
    }
}

impl<E: LoopbackEndpoint> HttpClient for LoopbackClient<E> {
    fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        self.endpoint.handle("GET", strip_origin(url), &[])
    }

    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        self.endpoint.handle("POST", strip_origin(url), &body)
    }
}

/// Reduces an absolute URL to its path-and-query target.
fn strip_origin(url: &str) -> &str {
    if let Some(scheme_end) = url.find("://") {
        let after_scheme = &url[scheme_end + 3..];
        match after_scheme.find('/') {
            Some(slash) => &after_scheme[slash..],
            None => "/",
        }
    } else {
        url
    }
}
