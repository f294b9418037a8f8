//! Persistence backends for document histories.
//!
//! A backend turns a [`DocumentId`] into a stored [`RevisionLog`] and back.
//! The pool only ever talks to the trait; what lives behind it (files on
//! disk, an in-memory map) is the backend's business.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use quire_history::{Change, DocumentId, RevisionLog};

use crate::error::{LoadError, StoreError};

/// Storage for persisted revision histories.
///
/// Calls are blocking and may be made concurrently for different documents.
/// The pool never calls `load`/`store` for the same document concurrently.
pub trait HistoryBackend<C: Change>: Send + Sync {
    /// Read the full history of `id`.
    fn load(&self, id: &DocumentId) -> Result<RevisionLog<C>, LoadError>;

    /// Replace the persisted history of `id` with `log`.
    fn store(&self, id: &DocumentId, log: &RevisionLog<C>) -> Result<(), StoreError>;

    fn exists(&self, id: &DocumentId) -> bool;

    /// Persist an empty history for a new document.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if `id` already has one.
    /// The default checks then stores; backends that can be shared between
    /// processes should override it with an atomic create.
    fn create(&self, id: &DocumentId) -> Result<(), StoreError> {
        if self.exists(id) {
            return Err(StoreError::AlreadyExists(id.clone()));
        }
        self.store(id, &RevisionLog::new())
    }

    /// Every document with a persisted history, sorted.
    fn list(&self) -> Result<Vec<DocumentId>, LoadError>;
}
