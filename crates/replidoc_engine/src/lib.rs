//! Client-side replication engine for replidoc collections.
//!
//! A [`Replication`] keeps a local
//! [`DocumentStore`](replidoc_storage::DocumentStore) converged with a
//! master reachable through any [`MasterTransport`]. Applications read
//! and write through a [`ReplicaHandle`] and stay fully usable offline;
//! the engine meanwhile:
//!
//! - pulls committed changes in pages behind a monotonic checkpoint,
//!   applying them idempotently with last-write-wins semantics,
//! - pushes local edits in bounded batches carrying the assumed master
//!   state, and absorbs conflicts by adopting the returned master record,
//! - retries transient transport failures with exponential backoff,
//!   resending a failed batch unmodified,
//! - optionally waits for a cross-process lease so only one instance
//!   per collection talks to the master.
//!
//! # Example
//!
//! ```
//! use replidoc_engine::{MockTransport, Replication, ReplicationConfig};
//! use replidoc_protocol::Document;
//! use replidoc_storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # fn main() -> replidoc_engine::EngineResult<()> {
//! let replication = Replication::new(
//!     ReplicationConfig::new("people").one_shot(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockTransport::new()),
//! )?;
//!
//! let people = replication.handle();
//! people.upsert(Document::new("p-63xa", "Bob", "Kelso", 56))?;
//!
//! let report = replication.sync_once()?;
//! assert_eq!(report.pushed, 1);
//! # Ok(())
//! # }
//! ```
//!
//! For a long-running replica, [`Replication::start`] drives the same
//! cycle on background threads and then keeps the store live through
//! the master's change stream, or by polling when the transport has
//! none.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod coordinator;
mod error;
mod handle;
mod http;
mod lease;
mod ledger;
mod pull;
mod push;
mod state;
mod transport;

pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use config::{ReplicationConfig, RetryConfig};
pub use coordinator::{Replication, SyncReport};
pub use error::{EngineError, EngineResult};
pub use handle::ReplicaHandle;
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackEndpoint};
pub use lease::ReplicaLease;
pub use state::{ReplicationStats, ReplicationStatus};
pub use transport::{MasterTransport, MockTransport};
