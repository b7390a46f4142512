//! # Replidoc Master
//!
//! Authoritative master store service for the replidoc sync protocol.
//!
//! This crate provides:
//! - [`MasterStore`]: conditional writes via the conflict resolver, snapshot
//!   reads, reset, and a live change stream
//! - [`RequestHandler`]: typed operations with boundary validation
//! - [`MasterNode`]: route/query dispatch over raw JSON bodies
//!
//! # Architecture
//!
//! The master owns all of its state: records live in a
//! [`replidoc_storage::DocumentStore`], revisions come from a strictly
//! monotonic [`RevisionClock`], and accepted writes fan out through a
//! [`ChangeNotifier`]. One request entry point, `MasterNode::handle`, serves
//! the whole HTTP surface; hosting it on a real socket is the embedder's
//! concern.
//!
//! # Protocol
//!
//! Pushes carry `(assumedMasterState, newDocumentState)` pairs. A push whose
//! assumption matches the current record is committed with a fresh
//! server-side revision; a stale assumption gets the current record back as a
//! conflict and writes nothing. Pulls page through committed records in
//! `(updated, passportId)` order from a client-held checkpoint.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod clock;
mod config;
mod error;
mod handler;
mod node;
mod notifier;
mod store;

pub use clock::RevisionClock;
pub use config::MasterConfig;
pub use error::{MasterError, MasterResult};
pub use handler::{PullQuery, RequestHandler};
pub use node::MasterNode;
pub use notifier::ChangeNotifier;
pub use store::MasterStore;
