//! Error types for the document pool and its storage backends.

use std::io;
use std::path::PathBuf;

use quire_history::{DocumentId, HistoryError};
use thiserror::Error;

/// A persisted history could not be read.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no persisted history for {0}")]
    NotFound(DocumentId),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Bytes were read but are not a valid history.
    #[error("corrupt history for {id}: {reason}")]
    Corrupt { id: DocumentId, reason: String },
}

/// A history could not be written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode history: {0}")]
    Encode(String),

    #[error("history already exists: {0}")]
    AlreadyExists(DocumentId),

    /// Deliberate failure from a test backend.
    #[error("store rejected for {0}")]
    Rejected(DocumentId),
}

/// Errors surfaced by foreground pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to load history for {id}")]
    Load {
        id: DocumentId,
        #[source]
        source: LoadError,
    },

    #[error("failed to store history for {id}")]
    Store {
        id: DocumentId,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("history already exists: {0}")]
    AlreadyExists(DocumentId),

    /// The entry was evicted or disposed while the caller held it.
    ///
    /// The pool retries with a fresh entry; callers only see this when
    /// driving a [`CacheEntry`](crate::CacheEntry) directly.
    #[error("cache entry for {0} was retired")]
    EntryRetired(DocumentId),

    #[error("document pool is closed")]
    PoolClosed,

    #[error("document pool must be created inside a tokio runtime")]
    NoRuntime,

    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// True for failures to read persisted history.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, PoolError::Load { .. })
    }

    /// True when an append did not line up with the current head.
    pub fn is_out_of_order(&self) -> bool {
        matches!(
            self,
            PoolError::History(HistoryError::OutOfOrderRevision { .. })
        )
    }
}

/// A failed background maintenance pass.
///
/// Never reaches foreground callers; the supervisor logs it and counts it
/// toward restarting the task.
#[derive(Debug, Error)]
pub enum MaintenanceFault {
    #[error("failed to evict {id}: {source}")]
    Eviction {
        id: DocumentId,
        #[source]
        source: PoolError,
    },

    #[error("maintenance pass panicked: {0}")]
    Panicked(String),

    #[error("maintenance pass failed: {0}")]
    Other(String),
}
