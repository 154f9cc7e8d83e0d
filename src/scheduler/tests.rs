use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::config::{Declarations, StaticConfig};
use crate::registry::Repository;

struct Fixture {
    _tmp: TempDir,
    repos: std::path::PathBuf,
    store: Arc<IndexStore>,
    source: Arc<StaticConfig>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let repos = tmp.path().join("repos");
        fs::create_dir_all(&repos).unwrap();
        let store = Arc::new(IndexStore::open(tmp.path().join("index")).unwrap());
        Self {
            repos,
            store,
            source: Arc::new(StaticConfig::default()),
            _tmp: tmp,
        }
    }

    fn repo(&self, id: &str, files: &[(&str, &str)]) -> Repository {
        let root = self.repos.join(id);
        write_files(&root, files);
        Repository::local(id, root)
    }

    fn declare(&self, repos: Vec<Repository>) {
        self.source.set(Declarations {
            settings: None,
            repos,
        });
    }

    fn scheduler(&self, settings: Settings) -> Scheduler {
        Scheduler::new(
            settings,
            Arc::new(Registry::new()),
            Arc::clone(&self.store),
            Arc::clone(&self.source) as Arc<dyn ConfigSource>,
        )
    }
}

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn settings(auto_delete: bool) -> Settings {
    Settings {
        auto_delete_stale_repos: auto_delete,
        max_concurrent_indexers: 2,
        ..Settings::default()
    }
}

#[test]
fn test_trigger_guard_is_exclusive() {
    let flag = AtomicBool::new(false);
    let guard = TriggerGuard::try_acquire(&flag).unwrap();
    assert!(TriggerGuard::try_acquire(&flag).is_none());
    drop(guard);
    assert!(TriggerGuard::try_acquire(&flag).is_some());
}

#[tokio::test]
async fn test_run_once_indexes_declared_repos() {
    let fx = Fixture::new();
    fx.declare(vec![
        fx.repo("r1", &[("a.txt", "abcabc")]),
        fx.repo("r2", &[("b.txt", "hello world")]),
    ]);
    let scheduler = fx.scheduler(settings(true));

    let report = scheduler.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.indexed, vec!["r1", "r2"]);
    assert!(report.failed.is_empty());
    let (_, payload) = fx.store.read("r1").unwrap();
    assert_eq!(payload.offsets_in(b"abc", "a.txt"), vec![0, 3]);
    assert_eq!(scheduler.registry().stale_count(), 0);
}

#[tokio::test]
async fn test_second_cycle_is_noop() {
    let fx = Fixture::new();
    fx.declare(vec![fx.repo("r1", &[("a.txt", "abcabc")])]);
    let scheduler = fx.scheduler(settings(true));
    let cancel = CancellationToken::new();

    scheduler.run_once(&cancel).await.unwrap();
    let versions = fx.store.list_versions("r1").unwrap();

    let report = scheduler.run_once(&cancel).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(report.up_to_date, 1);
    assert_eq!(fx.store.list_versions("r1").unwrap(), versions);
}

#[tokio::test]
async fn test_changed_declaration_is_rebuilt() {
    let fx = Fixture::new();
    let repo = fx.repo("r1", &[("src/a.txt", "alpha"), ("docs/b.txt", "bravo")]);
    fx.declare(vec![repo.clone()]);
    let scheduler = fx.scheduler(settings(true));
    let cancel = CancellationToken::new();
    scheduler.run_once(&cancel).await.unwrap();

    fx.declare(vec![repo.with_excluded_paths(["docs/"])]);
    let report = scheduler.run_once(&cancel).await.unwrap();

    assert_eq!(report.indexed, vec!["r1"]);
    let (_, payload) = fx.store.read("r1").unwrap();
    assert_eq!(payload.files, vec!["src/a.txt"]);
}

#[tokio::test]
async fn test_removed_repo_purged_with_auto_delete() {
    let fx = Fixture::new();
    let r1 = fx.repo("r1", &[("a.txt", "abc")]);
    let r2 = fx.repo("r2", &[("b.txt", "def")]);
    fx.declare(vec![r1.clone(), r2]);
    let scheduler = fx.scheduler(settings(true));
    let cancel = CancellationToken::new();
    scheduler.run_once(&cancel).await.unwrap();

    // r2 is also stale when it disappears; removal still wins.
    scheduler.registry().mark_stale("r2").unwrap();
    fx.declare(vec![r1]);
    let report = scheduler.run_once(&cancel).await.unwrap();

    assert_eq!(report.purged, vec!["r2"]);
    assert!(report.indexed.is_empty());
    assert!(scheduler.registry().get("r2").is_none());
    assert!(fx.store.read("r2").unwrap_err().is_not_found());
    assert!(fx.store.read("r1").is_ok());
}

#[tokio::test]
async fn test_removed_repo_retained_without_auto_delete() {
    let fx = Fixture::new();
    let r1 = fx.repo("r1", &[("a.txt", "abc")]);
    let r2 = fx.repo("r2", &[("b.txt", "def")]);
    fx.declare(vec![r1.clone(), r2]);
    let scheduler = fx.scheduler(settings(false));
    let cancel = CancellationToken::new();
    scheduler.run_once(&cancel).await.unwrap();

    fx.declare(vec![r1]);
    for _ in 0..2 {
        let report = scheduler.run_once(&cancel).await.unwrap();
        assert!(report.purged.is_empty());
        assert_eq!(report.retained, vec!["r2"]);
    }

    assert!(scheduler.registry().get("r2").unwrap().is_stale);
    assert!(fx.store.read("r2").is_ok());
}

#[tokio::test]
async fn test_orphaned_index_purged() {
    let fx = Fixture::new();
    let orphan = fx.repo("orphan", &[("a.txt", "abc")]);
    fx.declare(vec![orphan]);
    fx.scheduler(settings(true))
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    // A fresh process whose configuration no longer mentions it.
    fx.declare(Vec::new());
    let report = fx
        .scheduler(settings(true))
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.purged, vec!["orphan"]);
    assert!(fx.store.list_repo_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_adopts_existing_indexes() {
    let fx = Fixture::new();
    fx.declare(vec![fx.repo("r1", &[("a.txt", "abcabc")])]);
    fx.scheduler(settings(true))
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let restarted = fx.scheduler(settings(true));
    let report = restarted.run_once(&CancellationToken::new()).await.unwrap();

    assert!(report.indexed.is_empty());
    assert_eq!(report.up_to_date, 1);
    assert!(!restarted.registry().get("r1").unwrap().is_stale);
}

#[tokio::test]
async fn test_unreadable_repo_fails_and_stays_stale() {
    let fx = Fixture::new();
    let missing = Repository::local("missing", fx.repos.join("does-not-exist"));
    fx.declare(vec![missing, fx.repo("ok", &[("a.txt", "abc")])]);
    let scheduler = fx.scheduler(settings(true));
    let cancel = CancellationToken::new();

    for attempt in 1..=FAILURE_WARN_THRESHOLD {
        let report = scheduler.run_once(&cancel).await.unwrap();
        assert_eq!(report.failed, vec!["missing"]);
        let entry = scheduler.registry().snapshot_of("missing").unwrap();
        assert!(entry.repo.is_stale);
        assert_eq!(entry.consecutive_failures, attempt);
    }
    assert!(!scheduler.registry().get("ok").unwrap().is_stale);
}

#[tokio::test]
async fn test_cancelled_cycle_keeps_previous_index() {
    let fx = Fixture::new();
    let repo = fx.repo("r1", &[("a.txt", "abcabc")]);
    fx.declare(vec![repo.clone()]);
    let scheduler = fx.scheduler(settings(true));
    scheduler.run_once(&CancellationToken::new()).await.unwrap();
    let (before, _) = fx.store.read("r1").unwrap();

    scheduler.registry().mark_stale("r1").unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = scheduler.reindex(&cancel).await.unwrap().unwrap();

    assert_eq!(report.cancelled, vec!["r1"]);
    let (after, _) = fx.store.read("r1").unwrap();
    assert_eq!(before.indexed_at, after.indexed_at);
    assert!(scheduler.registry().get("r1").unwrap().is_stale);
}

#[tokio::test]
async fn test_corrupt_payload_is_rebuilt() {
    let fx = Fixture::new();
    fx.declare(vec![fx.repo("r1", &[("a.txt", "abcabc")])]);
    let scheduler = fx.scheduler(settings(true));
    let cancel = CancellationToken::new();
    scheduler.run_once(&cancel).await.unwrap();

    let (record, _) = fx.store.read("r1").unwrap();
    fs::write(record.location.unwrap().join("postings.json"), "garbage").unwrap();
    assert!(fx.store.read("r1").unwrap_err().is_not_found());

    let report = scheduler.run_once(&cancel).await.unwrap();
    assert_eq!(report.indexed, vec!["r1"]);
    assert_eq!(report.up_to_date, 0);
    let (_, payload) = fx.store.read("r1").unwrap();
    assert_eq!(payload.offsets_in(b"abc", "a.txt"), vec![0, 3]);
}

#[tokio::test]
async fn test_held_indexing_slot_blocks_build_and_purge() {
    let fx = Fixture::new();
    let r1 = fx.repo("r1", &[("a.txt", "abcabc")]);
    let r2 = fx.repo("r2", &[("b.txt", "other")]);
    fx.declare(vec![r1, r2.clone()]);
    let scheduler = fx.scheduler(settings(true));
    let cancel = CancellationToken::new();
    scheduler.run_once(&cancel).await.unwrap();
    let versions = fx.store.list_versions("r1").unwrap();

    let permit = scheduler
        .registry()
        .try_begin_indexing("r1")
        .unwrap()
        .unwrap();
    scheduler.registry().mark_stale("r1").unwrap();

    let report = scheduler.reindex(&cancel).await.unwrap().unwrap();
    assert_eq!(report.busy, vec!["r1"]);
    assert!(report.indexed.is_empty());
    assert_eq!(fx.store.list_versions("r1").unwrap(), versions);

    // r1 is removed from the configuration while its slot is still held.
    fx.declare(vec![r2]);
    scheduler.resync().await.unwrap().unwrap();
    let report = scheduler.reindex(&cancel).await.unwrap().unwrap();
    assert!(report.purged.is_empty());
    assert!(scheduler.registry().get("r1").is_some());
    assert_eq!(fx.store.list_versions("r1").unwrap(), versions);

    drop(permit);
    let report = scheduler.reindex(&cancel).await.unwrap().unwrap();
    assert_eq!(report.purged, vec!["r1"]);
    assert!(fx.store.read("r1").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_index_job_reports_busy() {
    let fx = Fixture::new();
    fx.declare(vec![fx.repo("r1", &[("a.txt", "abc")])]);
    let scheduler = fx.scheduler(settings(true));
    scheduler.resync().await.unwrap();

    let job = IndexJob {
        registry: Arc::clone(scheduler.registry()),
        store: Arc::clone(&fx.store),
        indexer: TrigramIndexer::new(settings(true)),
        workers: Arc::new(Semaphore::new(2)),
        cancel: CancellationToken::new(),
    };

    let permit = scheduler
        .registry()
        .try_begin_indexing("r1")
        .unwrap()
        .unwrap();
    let outcome = job.clone().run("r1".to_string()).await.unwrap();
    assert!(matches!(outcome, JobOutcome::Busy { ref id } if id == "r1"));
    assert!(fx.store.list_versions("r1").unwrap().is_empty());

    drop(permit);
    let outcome = job.run("r1".to_string()).await.unwrap();
    assert!(matches!(outcome, JobOutcome::Indexed { ref id, .. } if id == "r1"));
    assert_eq!(fx.store.list_versions("r1").unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_config_load_keeps_registry() {
    let fx = Fixture::new();
    fx.declare(vec![fx.repo("r1", &[("a.txt", "abc")])]);
    let scheduler = fx.scheduler(settings(true));
    scheduler.resync().await.unwrap();

    struct Broken;
    impl ConfigSource for Broken {
        fn load(&self) -> Result<crate::config::Declarations> {
            Err(Error::config("unreadable"))
        }
    }
    let broken = Scheduler::new(
        settings(true),
        Arc::clone(scheduler.registry()),
        Arc::clone(&fx.store),
        Arc::new(Broken),
    );

    assert!(broken.resync().await.is_err());
    assert!(broken.registry().get("r1").is_some());
}

#[tokio::test]
async fn test_run_until_cancelled() {
    let fx = Fixture::new();
    fx.declare(vec![fx.repo("r1", &[("a.txt", "abcabc")])]);
    let scheduler = Arc::new(fx.scheduler(Settings {
        reindex_interval: 20,
        resync_interval: 20,
        ..settings(true)
    }));

    let cancel = CancellationToken::new();
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(&cancel).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while fx.store.read("r1").is_err() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(fx.store.read("r1").is_ok());

    // Picked up by a later resync.
    fx.declare(vec![
        fx.repo("r1", &[("a.txt", "abcabc")]),
        fx.repo("r2", &[("b.txt", "xyz")]),
    ]);
    while fx.store.read("r2").is_err() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(fx.store.read("r2").is_ok());

    cancel.cancel();
    handle.await.unwrap().unwrap();
}
