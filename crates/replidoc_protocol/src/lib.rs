//! # Replidoc Protocol
//!
//! Wire types and conflict resolution for the replidoc sync protocol.
//!
//! This crate provides:
//! - [`Document`] / [`MasterRecord`] with the master-owned `updated` revision
//! - [`Checkpoint`] cursors for resumable incremental pulls
//! - [`ChangeRequest`] / [`PullStreamEvent`] message bodies
//! - [`resolve`], the pure optimistic-concurrency decision
//! - [`validate_document`], the schema boundary check
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Protocol crate version, surfaced by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod checkpoint;
mod document;
mod messages;
mod resolve;
mod validate;

pub use checkpoint::Checkpoint;
pub use document::{epoch, Document, MasterRecord, Revision};
pub use messages::{ChangeRequest, PullStreamEvent};
pub use resolve::{resolve, PushOutcome};
pub use validate::{validate_document, ValidationError, MAX_AGE};
