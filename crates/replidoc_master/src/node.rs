//! Route dispatch over raw request bytes.

use std::borrow::Cow;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use replidoc_protocol::{ChangeRequest, Checkpoint, Document, PullStreamEvent};
use tracing::debug;

use crate::config::MasterConfig;
use crate::error::{MasterError, MasterResult};
use crate::handler::{PullQuery, RequestHandler};
use crate::store::MasterStore;

/// The master node: the full server-side surface behind one entry point.
///
/// `handle` takes a method, a request target (path plus optional query
/// string), and the raw JSON body, and returns the raw JSON response. Binding
/// this to a real HTTP listener is the embedder's concern; tests and the CLI
/// drive it through an in-process loopback.
///
/// # Example
///
/// ```
/// use replidoc_master::{MasterConfig, MasterNode};
///
/// let node = MasterNode::new(MasterConfig::default());
/// let body = node.handle("GET", "/pull", &[]).unwrap();
/// assert_eq!(body, b"[]");
/// ```
pub struct MasterNode {
    handler: RequestHandler,
    master: Arc<MasterStore>,
}

impl MasterNode {
    /// Creates a node over a fresh master store.
    pub fn new(config: MasterConfig) -> Self {
        Self::with_master(config, Arc::new(MasterStore::new()))
    }

    /// Creates a node over an existing master store.
    pub fn with_master(config: MasterConfig, master: Arc<MasterStore>) -> Self {
        let handler = RequestHandler::new(Arc::clone(&master), config);
        Self { handler, master }
    }

    /// Dispatches one request and returns the response body.
    ///
    /// Routes:
    /// - `GET /pull?lastUpdate=&lastId=&limit=` → `Document[]`
    /// - `POST /push/change`, `POST /push/no-change` → `Conflict[]`
    /// - `POST /reset` → `"ok"`
    /// - `POST /set-person-by-passport-id` → `"ok"`
    pub fn handle(&self, method: &str, target: &str, body: &[u8]) -> MasterResult<Vec<u8>> {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        debug!(method, path, "master request");

        if method.eq_ignore_ascii_case("GET") && path == "/pull" {
            let documents = self.handler.handle_pull(parse_pull_query(query)?)?;
            return Ok(serde_json::to_vec(&documents)?);
        }

        if method.eq_ignore_ascii_case("POST") {
            match path {
                "/push/change" | "/push/no-change" => {
                    let requests: Vec<ChangeRequest> = serde_json::from_slice(body)?;
                    let conflicts = self.handler.handle_push(requests)?;
                    return Ok(serde_json::to_vec(&conflicts)?);
                }
                "/reset" => {
                    self.handler.handle_reset()?;
                    return Ok(serde_json::to_vec("ok")?);
                }
                "/set-person-by-passport-id" => {
                    let document: Document = serde_json::from_slice(body)?;
                    self.handler.handle_set_person(document)?;
                    return Ok(serde_json::to_vec("ok")?);
                }
                _ => {}
            }
        }

        Err(MasterError::UnknownRoute {
            method: method.to_string(),
            path: path.to_string(),
        })
    }

    /// Registers a live change stream subscriber.
    pub fn subscribe(&self) -> Receiver<PullStreamEvent> {
        self.master.subscribe()
    }

    /// The underlying master store.
    pub fn master(&self) -> &Arc<MasterStore> {
        &self.master
    }
}

/// Parses `lastUpdate`, `lastId` and `limit` from a raw query string.
///
/// Unknown parameters are ignored. `lastId` without `lastUpdate` does not
/// form a checkpoint.
fn parse_pull_query(raw: Option<&str>) -> MasterResult<PullQuery> {
    let Some(raw) = raw else {
        return Ok(PullQuery::default());
    };

    let mut last_update = None;
    let mut last_id = None;
    let mut limit = None;
    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value: Cow<'_, str> = urlencoding::decode(value)
            .map_err(|err| MasterError::InvalidRequest(format!("bad query encoding: {err}")))?;
        match key {
            "lastUpdate" => {
                let parsed = DateTime::parse_from_rfc3339(&value).map_err(|err| {
                    MasterError::InvalidRequest(format!("bad lastUpdate {value:?}: {err}"))
                })?;
                last_update = Some(parsed.with_timezone(&Utc));
            }
            "lastId" => last_id = Some(value.into_owned()),
            "limit" => {
                limit = Some(value.parse::<usize>().map_err(|_| {
                    MasterError::InvalidRequest(format!("bad limit {value:?}"))
                })?);
            }
            _ => {}
        }
    }

    Ok(PullQuery {
        checkpoint: last_update.map(|last_update| Checkpoint {
            last_update,
            last_id,
        }),
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn node() -> MasterNode {
        MasterNode::new(MasterConfig::default())
    }

    fn post(node: &MasterNode, path: &str, body: Value) -> Value {
        let bytes = node
            .handle("POST", path, body.to_string().as_bytes())
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(node: &MasterNode, target: &str) -> Value {
        let bytes = node.handle("GET", target, &[]).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn create_push_then_pull_round_trip() {
        let node = node();
        let response = post(
            &node,
            "/push/change",
            json!([{
                "newDocumentState": {
                    "passportId": "p1",
                    "firstName": "Bob",
                    "lastName": "Kelso",
                    "age": 56,
                    "_deleted": false
                }
            }]),
        );
        assert_eq!(response, json!([]));

        let pulled = get(&node, "/pull");
        let records = pulled.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["passportId"], "p1");
        assert_eq!(records[0]["age"], 56);
        // Server-assigned revision, not the client default.
        assert_ne!(records[0]["updated"], "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn stale_push_returns_master_truth_and_writes_nothing() {
        let node = node();
        // Seed current master state {p1, age: 100} at a known revision T1.
        post(
            &node,
            "/set-person-by-passport-id",
            json!({
                "passportId": "p1",
                "firstName": "Bob",
                "lastName": "Kelso",
                "age": 100,
                "updated": "2024-05-01T10:00:00.000Z"
            }),
        );

        // Push assuming an older revision T0.
        let response = post(
            &node,
            "/push/change",
            json!([{
                "assumedMasterState": {
                    "passportId": "p1",
                    "firstName": "Bob",
                    "lastName": "Kelso",
                    "age": 80,
                    "updated": "2024-05-01T09:00:00.000Z"
                },
                "newDocumentState": {
                    "passportId": "p1",
                    "firstName": "Bob",
                    "lastName": "Kelso",
                    "age": 40,
                    "updated": "2024-05-01T09:00:00.000Z"
                }
            }]),
        );

        assert_eq!(
            response,
            json!([{
                "passportId": "p1",
                "firstName": "Bob",
                "lastName": "Kelso",
                "age": 100,
                "updated": "2024-05-01T10:00:00.000Z",
                "_deleted": false
            }])
        );
        assert_eq!(node.master().record("p1").unwrap().unwrap().age, 100);
    }

    #[test]
    fn pull_accepts_checkpoint_query() {
        let node = node();
        post(
            &node,
            "/set-person-by-passport-id",
            json!({
                "passportId": "a&b",
                "firstName": "A",
                "lastName": "B",
                "age": 1,
                "updated": "2024-01-01T00:00:00.000Z"
            }),
        );
        post(
            &node,
            "/set-person-by-passport-id",
            json!({
                "passportId": "later",
                "firstName": "A",
                "lastName": "B",
                "age": 2,
                "updated": "2024-02-01T00:00:00.000Z"
            }),
        );

        let target = format!(
            "/pull?lastUpdate={}&lastId={}&limit=10",
            urlencoding::encode("2024-01-01T00:00:00.000Z"),
            urlencoding::encode("a&b"),
        );
        let pulled = get(&node, &target);
        let records = pulled.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["passportId"], "later");
    }

    #[test]
    fn both_push_routes_share_the_handler() {
        let node = node();
        let body = json!([{
            "newDocumentState": {
                "passportId": "p1", "firstName": "A", "lastName": "B", "age": 3
            }
        }]);
        assert_eq!(post(&node, "/push/no-change", body), json!([]));
        assert_eq!(node.master().record_count().unwrap(), 1);
    }

    #[test]
    fn reset_empties_the_store() {
        let node = node();
        post(
            &node,
            "/push/change",
            json!([{ "newDocumentState": {
                "passportId": "p1", "firstName": "A", "lastName": "B", "age": 3
            }}]),
        );
        let ok = post(&node, "/reset", json!(null));
        assert_eq!(ok, json!("ok"));
        assert_eq!(get(&node, "/pull"), json!([]));
    }

    #[test]
    fn unknown_routes_are_rejected() {
        let node = node();
        let err = node.handle("PUT", "/pull", &[]).unwrap_err();
        assert!(matches!(err, MasterError::UnknownRoute { .. }));
        let err = node.handle("POST", "/nope", &[]).unwrap_err();
        assert!(matches!(err, MasterError::UnknownRoute { .. }));
    }

    #[test]
    fn malformed_body_is_a_client_error() {
        let node = node();
        let err = node.handle("POST", "/push/change", b"not json").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn bad_query_parameters_are_rejected() {
        let node = node();
        assert!(node.handle("GET", "/pull?lastUpdate=yesterday", &[]).is_err());
        assert!(node.handle("GET", "/pull?limit=minus-one", &[]).is_err());
        // lastId alone does not form a checkpoint.
        let ok = node.handle("GET", "/pull?lastId=p1", &[]).unwrap();
        assert_eq!(ok, b"[]");
    }
}
