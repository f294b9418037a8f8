//! End-to-end pool behavior against real `.history` files and the counting
//! in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use quire_history::{ChangeMetadata, DocumentId, DocumentState, Edit, Revision, RevisionLog};
use quire_pool::{
    DocumentPool, FileBackend, HistoryBackend, MemoryBackend, PoolConfig, PoolError, TaskState,
};
use tempfile::TempDir;
use tokio::task::JoinSet;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("quire_pool=debug")
        .try_init();
}

fn id(name: &str) -> DocumentId {
    DocumentId::new(name).unwrap()
}

fn bundle(start: Revision, author: &str, edits: Vec<Edit>) -> RevisionLog<Edit> {
    let mut log = RevisionLog::starting_at(start);
    log.add_revision_bundle(start, ChangeMetadata::now(author), edits)
        .unwrap();
    log
}

fn memory_pool(names: &[&str], timeout: Duration) -> (Arc<MemoryBackend>, DocumentPool<Edit>) {
    let backend = Arc::new(MemoryBackend::new());
    for name in names {
        backend.insert(id(name), &RevisionLog::<Edit>::new()).unwrap();
    }
    let pool = DocumentPool::new(backend.clone(), timeout).unwrap();
    (backend, pool)
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_lookups_load_once() {
    init_tracing();
    let (backend, pool) = memory_pool(&["shared"], Duration::from_secs(60));
    backend.set_load_delay(Some(Duration::from_millis(50)));
    let pool = Arc::new(pool);

    let mut lookups = JoinSet::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        lookups.spawn_blocking(move || pool.lookup(&id("shared")).unwrap());
    }
    let mut logs = Vec::new();
    while let Some(log) = lookups.join_next().await {
        logs.push(log.unwrap());
    }

    assert_eq!(backend.load_count(), 1);
    assert_eq!(pool.len(), 1);
    assert!(logs.iter().all(|log| Arc::ptr_eq(log, &logs[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_load_does_not_block_other_documents() {
    init_tracing();
    let (backend, pool) = memory_pool(&["slow", "fast"], Duration::from_secs(60));
    pool.lookup(&id("fast")).unwrap();
    backend.set_load_delay(Some(Duration::from_millis(300)));

    std::thread::scope(|s| {
        let slow = s.spawn(|| pool.lookup(&id("slow")).unwrap());
        std::thread::sleep(Duration::from_millis(50));

        // cached document is served while the other one is still loading
        let started = std::time::Instant::now();
        pool.lookup_head(&id("fast")).unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));

        slow.join().unwrap();
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_stay_contiguous() {
    init_tracing();
    let (_backend, pool) = memory_pool(&["doc"], Duration::from_secs(60));
    let pool = Arc::new(pool);
    let doc = id("doc");

    let mut writers = JoinSet::new();
    for writer in 0..4 {
        let pool = Arc::clone(&pool);
        let doc = doc.clone();
        writers.spawn_blocking(move || {
            let mut committed = 0;
            while committed < 10 {
                let head = pool.lookup_head(&doc).unwrap();
                let edit = Edit::AddAxiom(format!("w{writer}-{committed}"));
                match pool.commit(&doc, head, ChangeMetadata::now(format!("user:{writer}")), vec![edit]) {
                    Ok(_) => committed += 1,
                    Err(e) if e.is_out_of_order() => continue,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        });
    }
    while let Some(result) = writers.join_next().await {
        result.unwrap();
    }

    let log = pool.lookup(&doc).unwrap();
    assert_eq!(log.end_revision(), Revision::new(40));
    assert!(log.is_consistent());
    assert_eq!(log.changes().len(), 40);
}

#[tokio::test]
async fn test_idle_entries_are_evicted_and_reloaded() {
    init_tracing();
    let (backend, pool) = memory_pool(&["doc"], Duration::from_millis(100));
    let doc = id("doc");

    pool.update(&doc, &bundle(Revision::ZERO, "user:amy", vec![Edit::AddAxiom("A".into())]))
        .unwrap();
    let head = pool.lookup_head(&doc).unwrap();

    // the maintenance task evicts it on its own
    eventually("eviction", || !pool.contains(&doc)).await;
    assert_eq!(backend.store_count(), 1, "flushed before eviction");

    assert_eq!(pool.lookup_head(&doc).unwrap(), head);
    assert_eq!(backend.load_count(), 2);
    assert_eq!(
        backend.stored::<Edit>(&doc).unwrap().changes(),
        vec![Edit::AddAxiom("A".into())]
    );
}

#[tokio::test]
async fn test_touch_resets_idle_clock() {
    init_tracing();
    let (_backend, pool) = memory_pool(&["doc"], Duration::from_millis(200));
    let doc = id("doc");
    pool.lookup(&doc).unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    pool.lookup_head(&doc).unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    pool.evict_idle().unwrap();
    assert!(pool.contains(&doc), "touched 120ms ago with a 200ms timeout");

    tokio::time::sleep(Duration::from_millis(250)).await;
    pool.evict_idle().unwrap();
    assert!(!pool.contains(&doc));
}

#[tokio::test]
async fn test_sync_flushes_without_evicting() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FileBackend::open(dir.path()).unwrap());
    let pool: DocumentPool<Edit> = DocumentPool::new(backend.clone(), Duration::from_secs(60)).unwrap();
    let doc = id("projects/pizza");

    pool.create_document(&doc).unwrap();
    pool.update(&doc, &bundle(Revision::ZERO, "user:amy", vec![Edit::SetDocumentIri("urn:pizza".into())]))
        .unwrap();

    let summary = pool.sync();
    assert_eq!(summary.flushed, 1);
    assert!(pool.contains(&doc));
    assert!(dir.path().join("projects/pizza.history").is_file());

    let on_disk: RevisionLog<Edit> = backend.load(&doc).unwrap();
    assert_eq!(on_disk.end_revision(), Revision::new(1));

    pool.update(&doc, &bundle(Revision::new(1), "user:bob", vec![Edit::AddAxiom("Pizza ⊑ Food".into())]))
        .unwrap();
    assert_eq!(pool.lookup_head(&doc).unwrap(), Revision::new(2));
}

#[tokio::test]
async fn test_maintenance_restarts_after_repeated_faults() {
    init_tracing();
    let (backend, pool) = memory_pool(&["doc"], Duration::from_millis(10));
    let doc = id("doc");
    pool.update(&doc, &bundle(Revision::ZERO, "user:amy", vec![Edit::AddAxiom("A".into())]))
        .unwrap();

    // every eviction attempt now fails to flush
    backend.set_fail_stores(true);
    eventually("restart", || pool.maintenance().restarts >= 1).await;

    let stats = pool.maintenance();
    assert!(stats.generation >= 2);
    assert!(stats.faults >= 9);
    assert!(pool.contains(&doc), "unflushed entry is never dropped");

    // once storage recovers the new task evicts normally
    backend.set_fail_stores(false);
    eventually("eviction", || !pool.contains(&doc)).await;
    eventually("clean pass", || pool.maintenance().consecutive_failures == 0).await;
    assert_eq!(backend.stored::<Edit>(&doc).unwrap().end_revision(), Revision::new(1));
}

#[tokio::test]
async fn test_dispose_twice_leaves_pool_empty_and_stopped() {
    init_tracing();
    let (backend, pool) = memory_pool(&["a", "b"], Duration::from_secs(60));
    pool.update(&id("a"), &bundle(Revision::ZERO, "user:amy", vec![Edit::AddAxiom("A".into())]))
        .unwrap();
    pool.lookup(&id("b")).unwrap();

    pool.dispose().unwrap();
    assert!(pool.is_empty());
    assert_eq!(pool.maintenance().state, TaskState::Stopped);
    assert_eq!(backend.store_count(), 1, "only the dirty entry is written");

    pool.dispose().unwrap();
    assert!(pool.is_empty());
    assert_eq!(pool.maintenance().state, TaskState::Stopped);
    assert!(matches!(pool.lookup_head(&id("a")), Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn test_file_pool_survives_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = PoolConfig::from_ron(&format!(
        "(history_root: {:?}, timeout_ms: 60000)",
        dir.path().display().to_string()
    ))
    .unwrap();
    let doc = id("team/ontology");

    let pool: DocumentPool<Edit> = DocumentPool::from_config(&config).unwrap();
    pool.create_document(&doc).unwrap();
    let head = pool
        .commit(&doc, Revision::ZERO, ChangeMetadata::now("user:amy"), vec![
            Edit::AddAxiom("A".into()),
            Edit::AddImport("urn:upper".into()),
        ])
        .unwrap();
    pool.commit(&doc, head, ChangeMetadata::now("user:bob"), vec![Edit::RemoveImport("urn:upper".into())])
        .unwrap();
    pool.dispose().unwrap();

    let reopened: DocumentPool<Edit> = DocumentPool::from_config(&config).unwrap();
    let log = reopened.lookup(&doc).unwrap();
    assert_eq!(log.end_revision(), Revision::new(2));
    assert_eq!(log.metadata_for(Revision::new(1)).unwrap().author, "user:bob");

    let mut state = DocumentState::new();
    log.replay_onto(&mut state);
    assert!(state.imports.is_empty());
    assert!(state.axioms.contains("A"));
    reopened.dispose().unwrap();
}

#[tokio::test]
async fn test_corrupt_file_fails_loudly() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FileBackend::open(dir.path()).unwrap());
    std::fs::write(dir.path().join("broken.history"), b"QRH1\x01\x00garbage").unwrap();
    let pool: DocumentPool<Edit> = DocumentPool::new(backend, Duration::from_secs(60)).unwrap();

    let err = pool.lookup(&id("broken")).unwrap_err();
    assert!(err.is_load_failure());
    let err = pool
        .update(&id("broken"), &bundle(Revision::ZERO, "user:amy", vec![]))
        .unwrap_err();
    assert!(err.is_load_failure());
}
