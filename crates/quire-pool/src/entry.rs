//! One document's slot in the pool.
//!
//! A `CacheEntry` sits between the in-memory [`RevisionLog`] and its
//! persisted form. It loads lazily, remembers whether it has unflushed
//! bundles, and records when it was last used so the maintenance task can
//! evict it.
//!
//! # Concurrency Model
//!
//! - A `parking_lot::Mutex` around the slot serializes load, append, flush
//!   and retirement of this one entry; backend I/O happens under it
//! - Readers get an `Arc` snapshot of the log; appends copy-on-write, so a
//!   snapshot never changes under its holder
//! - `retired` is readable without the slot lock so the pool can skip dead
//!   entries while holding its own map lock

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quire_history::{Change, ChangeMetadata, DocumentId, Revision, RevisionLog};
use tracing::{debug, info};

use crate::backend::HistoryBackend;
use crate::error::PoolError;

enum Slot<C> {
    /// Not read from the backend yet.
    Unloaded,
    Loaded {
        log: Arc<RevisionLog<C>>,
        /// Holds bundles the backend has not seen.
        dirty: bool,
    },
    /// Flushed and released; every further call fails.
    Retired,
}

/// In-memory, persistence-backed holder of one document's history.
pub struct CacheEntry<C: Change> {
    id: DocumentId,
    backend: Arc<dyn HistoryBackend<C>>,
    slot: Mutex<Slot<C>>,
    last_touch: Mutex<Instant>,
    retired: AtomicBool,
}

impl<C: Change> CacheEntry<C> {
    /// An entry that loads from `backend` on first use.
    pub fn new(id: DocumentId, backend: Arc<dyn HistoryBackend<C>>) -> Self {
        Self::with_slot(id, backend, Slot::Unloaded)
    }

    /// An entry for a history that is already in memory and persisted.
    pub fn preloaded(
        id: DocumentId,
        backend: Arc<dyn HistoryBackend<C>>,
        log: RevisionLog<C>,
    ) -> Self {
        let slot = Slot::Loaded {
            log: Arc::new(log),
            dirty: false,
        };
        Self::with_slot(id, backend, slot)
    }

    fn with_slot(id: DocumentId, backend: Arc<dyn HistoryBackend<C>>, slot: Slot<C>) -> Self {
        Self {
            id,
            backend,
            slot: Mutex::new(slot),
            last_touch: Mutex::new(Instant::now()),
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// When the log was last read or appended to.
    pub fn last_touch(&self) -> Instant {
        *self.last_touch.lock()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Loaded { .. })
    }

    pub fn is_dirty(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Loaded { dirty: true, .. })
    }

    /// Current log, loading it first if needed.
    pub fn read_revision_log(&self) -> Result<Arc<RevisionLog<C>>, PoolError> {
        let mut slot = self.slot.lock();
        let (log, _) = self.loaded(&mut slot)?;
        let log = Arc::clone(log);
        self.touch();
        Ok(log)
    }

    /// Revision the document is at, without handing out the log.
    pub fn head_revision(&self) -> Result<Revision, PoolError> {
        let mut slot = self.slot.lock();
        let (log, _) = self.loaded(&mut slot)?;
        let head = log.end_revision();
        self.touch();
        Ok(head)
    }

    /// Append every bundle of `incoming`, which must start at the current
    /// head. Returns the new head.
    pub fn append_revision_log(&self, incoming: &RevisionLog<C>) -> Result<Revision, PoolError> {
        let mut slot = self.slot.lock();
        let (log, dirty) = self.loaded(&mut slot)?;
        let head = Arc::make_mut(log).append(incoming)?;
        *dirty |= !incoming.is_empty();
        self.touch();
        Ok(head)
    }

    /// Append one bundle committed against `base`, which must be the head.
    pub fn commit(
        &self,
        base: Revision,
        metadata: ChangeMetadata,
        changes: Vec<C>,
    ) -> Result<Revision, PoolError> {
        let mut slot = self.slot.lock();
        let (log, dirty) = self.loaded(&mut slot)?;
        let head = Arc::make_mut(log).add_revision_bundle(base, metadata, changes)?;
        *dirty = true;
        self.touch();
        Ok(head)
    }

    /// Flush unsaved bundles. Returns whether anything was written.
    ///
    /// The entry stays loaded and usable.
    pub fn sync(&self) -> Result<bool, PoolError> {
        let mut slot = self.slot.lock();
        self.flush(&mut slot)
    }

    /// Flush, then release the log. The entry is unusable afterwards.
    ///
    /// If the flush fails the log is kept and the entry stays live.
    pub fn dispose(&self) -> Result<(), PoolError> {
        let mut slot = self.slot.lock();
        self.retire(&mut slot)
    }

    /// Dispose the entry if it has not been touched for longer than
    /// `timeout` as of `now`. Returns whether the entry is retired.
    ///
    /// The idle check and the flush happen under one lock, so a concurrent
    /// touch either keeps the entry alive or lands after retirement (and
    /// then fails with [`PoolError::EntryRetired`]).
    pub fn retire_if_idle(&self, now: Instant, timeout: Duration) -> Result<bool, PoolError> {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Retired) {
            return Ok(true);
        }
        if now.saturating_duration_since(self.last_touch()) <= timeout {
            return Ok(false);
        }
        self.retire(&mut slot)?;
        Ok(true)
    }

    fn touch(&self) {
        *self.last_touch.lock() = Instant::now();
    }

    fn loaded<'s>(
        &self,
        slot: &'s mut Slot<C>,
    ) -> Result<(&'s mut Arc<RevisionLog<C>>, &'s mut bool), PoolError> {
        if let Slot::Unloaded = slot {
            let log = self.backend.load(&self.id).map_err(|source| PoolError::Load {
                id: self.id.clone(),
                source,
            })?;
            info!(
                document = %self.id,
                head = %log.end_revision(),
                "Loaded in-memory change history"
            );
            *slot = Slot::Loaded {
                log: Arc::new(log),
                dirty: false,
            };
        }
        match slot {
            Slot::Loaded { log, dirty } => Ok((log, dirty)),
            _ => Err(PoolError::EntryRetired(self.id.clone())),
        }
    }

    fn flush(&self, slot: &mut Slot<C>) -> Result<bool, PoolError> {
        let Slot::Loaded { log, dirty } = slot else {
            return Ok(false);
        };
        if !*dirty {
            return Ok(false);
        }
        self.backend
            .store(&self.id, log)
            .map_err(|source| PoolError::Store {
                id: self.id.clone(),
                source,
            })?;
        *dirty = false;
        debug!(document = %self.id, head = %log.end_revision(), "Flushed change history");
        Ok(true)
    }

    fn retire(&self, slot: &mut Slot<C>) -> Result<(), PoolError> {
        if matches!(slot, Slot::Retired) {
            return Ok(());
        }
        self.flush(slot)?;
        *slot = Slot::Retired;
        self.retired.store(true, Ordering::Release);
        Ok(())
    }
}

impl<C: Change> std::fmt::Debug for CacheEntry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}
