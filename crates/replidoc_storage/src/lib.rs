//! # Replidoc Storage
//!
//! Keyed document store trait and in-memory implementation for replidoc.
//!
//! Both sides of the replication protocol sit on the same abstraction: the
//! master keeps its authoritative records in a [`DocumentStore`], and every
//! replica keeps its local copy in another. Stores are dumb keyed containers;
//! conflict resolution, revision stamping, and checkpoint bookkeeping all
//! happen above this crate.
//!
//! ## Example
//!
//! ```rust
//! use replidoc_protocol::Document;
//! use replidoc_storage::{DocumentStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.put(Document::new("p1", "Bob", "Kelso", 56)).unwrap();
//! assert_eq!(store.visible().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use store::DocumentStore;
