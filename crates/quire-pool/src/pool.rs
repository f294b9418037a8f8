//! The document pool: registry, lifecycle manager and janitor.
//!
//! # Concurrency Model
//!
//! - One `parking_lot::Mutex` guards map membership only (find-or-create,
//!   remove, drain, snapshot). It is never held across backend I/O
//! - Loading, appending and flushing happen on the [`CacheEntry`] under its
//!   own lock, so a slow load of one document never blocks another
//! - Eviction flushes and retires an entry under the entry lock *before*
//!   removing it from the map, and only removes that exact `Arc`. A caller
//!   that raced the eviction sees [`PoolError::EntryRetired`] internally and
//!   transparently retries with a fresh entry reloaded from storage
//!
//! # Example
//!
//! ```ignore
//! let backend = Arc::new(FileBackend::open("/srv/quire")?);
//! let pool: DocumentPool<Edit> = DocumentPool::new(backend, Duration::from_secs(60))?;
//!
//! let id = DocumentId::new("projects/pizza")?;
//! let head = pool.lookup_head(&id)?;
//! pool.commit(&id, head, ChangeMetadata::now("user:amy"), vec![Edit::AddAxiom("Pizza ⊑ Food".into())])?;
//!
//! pool.sync();
//! pool.dispose()?;
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quire_history::{Change, ChangeMetadata, DocumentId, Revision, RevisionLog};
use tracing::{debug, error, info, warn};

use crate::backend::{FileBackend, HistoryBackend};
use crate::config::PoolConfig;
use crate::constants::{DEFAULT_POOL_TIMEOUT, MAINTAINER_TASK_NAME};
use crate::entry::CacheEntry;
use crate::error::{MaintenanceFault, PoolError, StoreError};
use crate::supervisor::{MaintenanceJob, MaintenanceStats, Supervisor};

struct PoolState<C: Change> {
    entries: BTreeMap<DocumentId, Arc<CacheEntry<C>>>,
    closed: bool,
}

struct PoolInner<C: Change> {
    timeout: Duration,
    backend: Arc<dyn HistoryBackend<C>>,
    state: Mutex<PoolState<C>>,
}

/// Result of a whole-pool [`DocumentPool::sync`].
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Entries that had unsaved bundles and were written.
    pub flushed: usize,
    /// Entries whose flush failed; they stay dirty.
    pub failures: Vec<(DocumentId, PoolError)>,
}

impl SyncSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Concurrency-safe cache of document histories with idle eviction.
///
/// Construct one per server and call [`dispose`](Self::dispose) at shutdown;
/// dropping the pool without disposing stops maintenance but does not flush.
pub struct DocumentPool<C: Change> {
    inner: Arc<PoolInner<C>>,
    maintenance: Supervisor,
}

impl<C: Change> DocumentPool<C> {
    /// Create a pool whose entries are evicted after `timeout` without use.
    ///
    /// The maintenance task ticks every `timeout` and is spawned on the
    /// current tokio runtime.
    pub fn new(backend: Arc<dyn HistoryBackend<C>>, timeout: Duration) -> Result<Self, PoolError> {
        if timeout.is_zero() {
            return Err(PoolError::Config("pool timeout must be positive".into()));
        }
        let inner = Arc::new(PoolInner {
            timeout,
            backend,
            state: Mutex::new(PoolState {
                entries: BTreeMap::new(),
                closed: false,
            }),
        });
        let janitor = Arc::new(Janitor {
            pool: Arc::downgrade(&inner),
        });
        let maintenance = Supervisor::start(MAINTAINER_TASK_NAME, timeout, janitor)?;
        Ok(Self { inner, maintenance })
    }

    /// A pool with the default 60 second timeout.
    pub fn with_default_timeout(backend: Arc<dyn HistoryBackend<C>>) -> Result<Self, PoolError> {
        Self::new(backend, DEFAULT_POOL_TIMEOUT)
    }

    /// A file-backed pool rooted at `config.history_root`.
    pub fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        let backend = FileBackend::open(&config.history_root).map_err(|e| {
            PoolError::Config(format!("{}: {e}", config.history_root.display()))
        })?;
        Self::new(Arc::new(backend), config.timeout()?)
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// The document's full history, loading it if it is not cached.
    pub fn lookup(&self, id: &DocumentId) -> Result<Arc<RevisionLog<C>>, PoolError> {
        self.inner.with_entry(id, |entry| entry.read_revision_log())
    }

    /// The revision the document is at, loading it if it is not cached.
    pub fn lookup_head(&self, id: &DocumentId) -> Result<Revision, PoolError> {
        self.inner.with_entry(id, |entry| entry.head_revision())
    }

    /// Append `changes`, which must start at the document's head.
    ///
    /// Fails loudly if the persisted history cannot be loaded; a broken
    /// history is never silently replaced by a fresh one.
    pub fn update(&self, id: &DocumentId, changes: &RevisionLog<C>) -> Result<Revision, PoolError> {
        self.inner
            .with_entry(id, |entry| entry.append_revision_log(changes))
    }

    /// Append one bundle committed against `base`.
    ///
    /// `base` is the client's version stamp; anything other than the current
    /// head is rejected as out of order.
    pub fn commit(
        &self,
        id: &DocumentId,
        base: Revision,
        metadata: ChangeMetadata,
        changes: Vec<C>,
    ) -> Result<Revision, PoolError> {
        self.inner.with_entry(id, |entry| {
            entry.commit(base, metadata.clone(), changes.clone())
        })
    }

    /// Persist an empty history for a new document and cache it.
    pub fn create_document(&self, id: &DocumentId) -> Result<(), PoolError> {
        self.inner.ensure_open()?;
        self.inner.backend.create(id).map_err(|source| match source {
            StoreError::AlreadyExists(id) => PoolError::AlreadyExists(id),
            source => PoolError::Store {
                id: id.clone(),
                source,
            },
        })?;

        let entry = Arc::new(CacheEntry::preloaded(
            id.clone(),
            Arc::clone(&self.inner.backend),
            RevisionLog::new(),
        ));
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        match state.entries.get(id) {
            // checked out while the file was being written; it loads the
            // new history itself and must stay the only live entry
            Some(live) if !live.is_retired() => {
                debug!(document = %id, "Created change history under a live entry");
            }
            _ => {
                state.entries.insert(id.clone(), entry);
            }
        }
        info!(document = %id, "Created change history");
        Ok(())
    }

    /// Flush every dirty entry. Entries stay cached.
    ///
    /// Failures are logged and collected; the sweep always covers every
    /// entry that was in the pool when it started.
    pub fn sync(&self) -> SyncSummary {
        let snapshot = self.inner.snapshot();
        let mut summary = SyncSummary::default();
        for (id, entry) in snapshot {
            match entry.sync() {
                Ok(true) => summary.flushed += 1,
                Ok(false) | Err(PoolError::EntryRetired(_)) => {}
                Err(e) => {
                    error!(document = %id, error = %e, "Failed to flush change history");
                    summary.failures.push((id, e));
                }
            }
        }
        summary
    }

    /// Flush and release every entry, then stop maintenance.
    ///
    /// Every other operation fails with [`PoolError::PoolClosed`]
    /// afterwards. Returns the first flush failure, after attempting all
    /// entries. Entries whose flush failed stay in the pool, so calling
    /// `dispose` again retries exactly those; once everything is flushed
    /// further calls are no-ops.
    pub fn dispose(&self) -> Result<(), PoolError> {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.closed && state.entries.is_empty() {
                return Ok(());
            }
            state.closed = true;
            std::mem::take(&mut state.entries)
        };

        let count = drained.len();
        let mut first_error = None;
        let mut unflushed = Vec::new();
        for (id, entry) in drained {
            if let Err(e) = entry.dispose() {
                error!(document = %id, error = %e, "Failed to flush change history on dispose");
                first_error.get_or_insert(e);
                unflushed.push((id, entry));
            }
        }
        if !unflushed.is_empty() {
            self.inner.state.lock().entries.extend(unflushed);
        }
        self.maintenance.shutdown();
        info!(entries = count, "Disposed document pool");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run one eviction pass now, as the maintenance task would.
    pub fn evict_idle(&self) -> Result<usize, MaintenanceFault> {
        self.inner.evict_idle()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` currently has a cache entry.
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.inner.state.lock().entries.contains_key(id)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn maintenance(&self) -> MaintenanceStats {
        self.maintenance.stats()
    }
}

impl<C: Change> PoolInner<C> {
    fn ensure_open(&self) -> Result<(), PoolError> {
        if self.state.lock().closed {
            return Err(PoolError::PoolClosed);
        }
        Ok(())
    }

    /// Find or create the live entry for `id`. Only map membership changes
    /// under the lock; nothing is loaded here.
    fn checkout(&self, id: &DocumentId) -> Result<Arc<CacheEntry<C>>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        if let Some(entry) = state.entries.get(id) {
            if !entry.is_retired() {
                return Ok(Arc::clone(entry));
            }
        }
        let entry = Arc::new(CacheEntry::new(id.clone(), Arc::clone(&self.backend)));
        state.entries.insert(id.clone(), Arc::clone(&entry));
        info!(document = %id, "Checked out in-memory change history");
        Ok(entry)
    }

    fn with_entry<T>(
        &self,
        id: &DocumentId,
        op: impl Fn(&CacheEntry<C>) -> Result<T, PoolError>,
    ) -> Result<T, PoolError> {
        loop {
            let entry = self.checkout(id)?;
            match op(&entry) {
                Err(PoolError::EntryRetired(_)) => continue,
                other => return other,
            }
        }
    }

    fn snapshot(&self) -> Vec<(DocumentId, Arc<CacheEntry<C>>)> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }

    fn evict_idle(&self) -> Result<usize, MaintenanceFault> {
        let now = Instant::now();
        let candidates: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_touch()) > self.timeout)
            .collect();

        let mut evicted = 0;
        let mut first_fault = None;
        for (id, entry) in candidates {
            match entry.retire_if_idle(now, self.timeout) {
                Ok(true) => {
                    let mut state = self.state.lock();
                    if state
                        .entries
                        .get(&id)
                        .is_some_and(|current| Arc::ptr_eq(current, &entry))
                    {
                        state.entries.remove(&id);
                        evicted += 1;
                        info!(document = %id, "Disposed in-memory change history");
                    }
                }
                Ok(false) => {}
                Err(source) => {
                    warn!(document = %id, error = %source, "Could not evict idle change history");
                    first_fault.get_or_insert(MaintenanceFault::Eviction { id, source });
                }
            }
        }

        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(evicted),
        }
    }
}

/// Maintenance job that evicts idle entries.
///
/// Holds the pool weakly so the background task never keeps a dropped pool
/// alive.
struct Janitor<C: Change> {
    pool: Weak<PoolInner<C>>,
}

impl<C: Change> MaintenanceJob for Janitor<C> {
    fn run_pass(&self) -> Result<usize, MaintenanceFault> {
        match self.pool.upgrade() {
            Some(pool) => pool.evict_idle(),
            None => Ok(0),
        }
    }
}
