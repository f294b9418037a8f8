//! In-memory history backend.
//!
//! Used for tests and embedding. Histories are kept in their encoded form so
//! every load decodes a fresh copy, exactly like reading a file would. Load
//! and store calls are counted, and stores can be made to fail on demand.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use quire_history::{Change, DocumentId, RevisionLog};

use super::HistoryBackend;
use crate::codec;
use crate::error::{LoadError, StoreError};

/// Thread-safe in-memory backend. All data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: RwLock<BTreeMap<DocumentId, Vec<u8>>>,
    loads: AtomicUsize,
    stores: AtomicUsize,
    fail_stores: AtomicBool,
    load_delay: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document with an already-built history.
    pub fn insert<C: Change>(&self, id: DocumentId, log: &RevisionLog<C>) -> Result<(), StoreError> {
        let bytes = codec::encode(log).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.docs.write().insert(id, bytes);
        Ok(())
    }

    /// Seed a document with raw bytes (e.g. a corrupt history).
    pub fn insert_raw(&self, id: DocumentId, bytes: Vec<u8>) {
        self.docs.write().insert(id, bytes);
    }

    /// Decode what is currently stored for `id`, without counting a load.
    pub fn stored<C: Change>(&self, id: &DocumentId) -> Option<RevisionLog<C>> {
        let docs = self.docs.read();
        codec::decode(docs.get(id)?).ok()
    }

    /// Number of `load` calls so far, successful or not.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of successful `store` calls so far.
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    /// Make every following `store` fail until switched off again.
    pub fn set_fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every `load`, to widen race windows.
    pub fn set_load_delay(&self, delay: Option<Duration>) {
        *self.load_delay.lock() = delay;
    }
}

impl<C: Change> HistoryBackend<C> for MemoryBackend {
    fn load(&self, id: &DocumentId) -> Result<RevisionLog<C>, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let docs = self.docs.read();
        let bytes = docs.get(id).ok_or_else(|| LoadError::NotFound(id.clone()))?;
        codec::decode(bytes).map_err(|e| LoadError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })
    }

    fn store(&self, id: &DocumentId, log: &RevisionLog<C>) -> Result<(), StoreError> {
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(id.clone()));
        }
        let bytes = codec::encode(log).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.docs.write().insert(id.clone(), bytes);
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn exists(&self, id: &DocumentId) -> bool {
        self.docs.read().contains_key(id)
    }

    fn create(&self, id: &DocumentId) -> Result<(), StoreError> {
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(id.clone()));
        }
        let bytes = codec::encode(&RevisionLog::<C>::new())
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        // check and insert under one write lock
        match self.docs.write().entry(id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(bytes);
                self.stores.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn list(&self) -> Result<Vec<DocumentId>, LoadError> {
        Ok(self.docs.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_history::{ChangeMetadata, Edit, Revision};

    fn id(name: &str) -> DocumentId {
        DocumentId::new(name).unwrap()
    }

    #[test]
    fn test_counts_loads_and_stores() {
        let backend = MemoryBackend::new();
        let doc = id("doc");
        let mut log = RevisionLog::<Edit>::new();
        log.add_revision_bundle(Revision::ZERO, ChangeMetadata::at("user:amy", 1), vec![])
            .unwrap();

        backend.store(&doc, &log).unwrap();
        let loaded: RevisionLog<Edit> = backend.load(&doc).unwrap();
        let _: Result<RevisionLog<Edit>, _> = backend.load(&id("missing"));

        assert_eq!(loaded, log);
        assert_eq!(backend.store_count(), 1);
        assert_eq!(backend.load_count(), 2);
    }

    #[test]
    fn test_failing_stores() {
        let backend = MemoryBackend::new();
        backend.set_fail_stores(true);
        let result = backend.store(&id("doc"), &RevisionLog::<Edit>::new());
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(backend.store_count(), 0);
        assert!(!HistoryBackend::<Edit>::exists(&backend, &id("doc")));

        backend.set_fail_stores(false);
        HistoryBackend::<Edit>::create(&backend, &id("doc")).unwrap();
        assert!(backend.stored::<Edit>(&id("doc")).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_create_has_one_winner() {
        let backend = MemoryBackend::new();
        let doc = id("contested");
        let created = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| HistoryBackend::<Edit>::create(&backend, &doc)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(Result::is_ok)
                .count()
        });
        assert_eq!(created, 1);
        assert_eq!(backend.store_count(), 1);
        assert!(matches!(
            HistoryBackend::<Edit>::create(&backend, &doc),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_corrupt_bytes() {
        let backend = MemoryBackend::new();
        backend.insert_raw(id("bad"), vec![1, 2, 3, 4, 5, 6, 7]);
        let result: Result<RevisionLog<Edit>, _> = backend.load(&id("bad"));
        assert!(matches!(result, Err(LoadError::Corrupt { .. })));
    }
}
