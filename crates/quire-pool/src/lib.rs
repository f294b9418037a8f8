//! Pooled, self-maintaining cache of document revision histories.
//!
//! The pool keeps hot [`RevisionLog`](quire_history::RevisionLog)s in memory,
//! loads cold ones from a [`HistoryBackend`] on demand, and evicts entries
//! that sit idle longer than the configured timeout.
//!
//! # Architecture
//!
//! ```text
//! DocumentPool ── Mutex<BTreeMap<DocumentId, Arc<CacheEntry>>>
//!     │                      │
//!     │                      ├── CacheEntry "projects/pizza" ──► pizza.history
//!     │                      └── CacheEntry "projects/wine"  ──► wine.history
//!     │
//!     └── Supervisor ── generation n ── every timeout: evict idle entries
//!                                       (restarts itself after 9 straight faults)
//! ```
//!
//! Foreground calls (`lookup`, `update`, `sync`, `dispose`) report failures
//! to their caller and never retry. Background eviction faults stay inside
//! the supervisor.

pub mod backend;
pub mod codec;
pub mod config;
pub mod constants;
mod entry;
mod error;
mod pool;
pub mod supervisor;

pub use backend::{FileBackend, HistoryBackend, MemoryBackend};
pub use config::PoolConfig;
pub use entry::CacheEntry;
pub use error::{LoadError, MaintenanceFault, PoolError, StoreError};
pub use pool::{DocumentPool, SyncSummary};
pub use supervisor::{MaintenanceJob, MaintenanceStats, Supervisor, TaskState};
