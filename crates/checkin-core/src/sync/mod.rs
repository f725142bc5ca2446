//! Synchronization with the authoritative completion store.
//!
//! Local state is applied optimistically by [`SyncEngine`] and pushed through
//! a [`CompletionStore`]: [`HttpRemote`] for a server, [`MemoryStore`] for
//! tests and embedding, or the SQLite store in [`crate::storage`].

pub mod engine;
pub mod http;
pub mod memory;
pub mod remote;
pub mod types;
pub mod write_queue;

pub use engine::{LevelChange, ReconcileReport, SyncEngine, WriteOutcome};
pub use http::HttpRemote;
pub use memory::{MemoryStore, RecordedWrite};
pub use remote::{CatalogSource, CompletionStore};
pub use types::{SyncError, SyncStatus};
pub use write_queue::{WriteKey, WriteQueue};
