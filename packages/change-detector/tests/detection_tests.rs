//! End-to-end detection scenarios.
//!
//! Crawls run against a scripted origin with the SQLite store, and records
//! are reloaded from the store between cycles the way a restarted process
//! would see them.

mod common;

use std::sync::Arc;
use std::time::Duration;

use change_detector::testing::MockFetcher;
use change_detector::{
    ArchiveConfig, ArchiveRun, ChangeCoordinator, ChangeNotification, ChangeType, ContentHash,
    CoordinatorState, DetectorConfig, MemoryStore, PathRecord, PathRecordStore, LAST_ARCHIVE_KEY,
};
use url::Url;

use crate::common::TestHarness;

// =============================================================================
// Crawl scenarios
// =============================================================================

#[tokio::test]
async fn test_new_site_is_discovered_in_order() {
    let mut ctx = TestHarness::new().await;
    ctx.origin
        .page(
            "/index.html",
            r#"<script src="http://example.com/a.js"></script><link rel="stylesheet" href="/b.css">"#,
            Some("\"i1\""),
        )
        .page("/a.js", "fetch('/data/feed.json')", Some("\"a1\""))
        .page("/b.css", "body { background: url('/img/bg.png') }", None)
        .page("/data/feed.json", "[]", None)
        .page("/img/bg.png", vec![0u8, 159, 146, 150, 0, 0, 0, 0], None);
    ctx.seed(&["/"]).await;

    let changes = ctx.crawler().crawl(None).await.unwrap();

    // Children of /a.js and /b.css are ordered by which parent settled first.
    assert_eq!(changes.added[..3], ["/index.html", "/a.js", "/b.css"]);
    let mut grandchildren = changes.added[3..].to_vec();
    grandchildren.sort();
    assert_eq!(grandchildren, vec!["/data/feed.json", "/img/bg.png"]);
    assert!(changes.modified.is_empty());
    assert!(changes.removed.is_empty());

    let index = ctx.stored("/index.html").await.unwrap();
    assert_eq!(index.validator.as_deref(), Some("\"i1\""));
    assert!(index.is_present());
}

#[tokio::test]
async fn test_unchanged_site_reports_nothing() {
    let mut ctx = TestHarness::new().await;
    ctx.origin
        .page("/index.html", r#""/a.js""#, Some("\"i1\""))
        .page("/a.js", "a", Some("\"a1\""));
    ctx.seed(&["/index.html"]).await;
    ctx.crawler().crawl(None).await.unwrap();

    ctx.reload().await;
    let changes = ctx.crawler().crawl(None).await.unwrap();

    assert!(changes.is_empty());
    // Both requests were conditional and answered 304.
    let conditional = ctx
        .origin
        .requests()
        .into_iter()
        .filter(|r| r.validator.is_some())
        .count();
    assert_eq!(conditional, 2);
}

#[tokio::test]
async fn test_validator_drift_is_persisted_but_not_reported() {
    let mut ctx = TestHarness::new().await;
    ctx.origin.page("/a.js", "same body", Some("\"v1\""));
    ctx.seed(&["/a.js"]).await;
    ctx.crawler().crawl(None).await.unwrap();

    ctx.origin.page("/a.js", "same body", Some("\"v2\""));
    ctx.reload().await;
    let changes = ctx.crawler().crawl(None).await.unwrap();

    assert!(changes.is_empty());
    let stored = ctx.stored("/a.js").await.unwrap();
    assert_eq!(stored.validator.as_deref(), Some("\"v2\""));
    assert_eq!(stored.content_hash, Some(ContentHash::of(b"same body")));
}

#[tokio::test]
async fn test_removed_page_is_reported_once() {
    let mut ctx = TestHarness::new().await;
    ctx.origin.page("/old.html", "old", None);
    ctx.seed(&["/old.html"]).await;
    ctx.crawler().crawl(None).await.unwrap();

    ctx.origin.remove("/old.html");
    ctx.reload().await;
    let first = ctx.crawler().crawl(None).await.unwrap();
    assert_eq!(first.removed, vec!["/old.html"]);
    assert_eq!(
        ctx.stored("/old.html").await,
        Some(PathRecord::tombstone("/old.html"))
    );

    ctx.reload().await;
    let second = ctx.crawler().crawl(None).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_removed_page_can_come_back() {
    let mut ctx = TestHarness::new().await;
    ctx.origin.page("/page.html", "v1", None);
    ctx.seed(&["/page.html"]).await;
    ctx.crawler().crawl(None).await.unwrap();

    ctx.origin.remove("/page.html");
    ctx.reload().await;
    ctx.crawler().crawl(None).await.unwrap();

    ctx.origin.page("/page.html", "v2", None);
    ctx.reload().await;
    let changes = ctx.crawler().crawl(None).await.unwrap();
    assert_eq!(changes.added, vec!["/page.html"]);
}

#[tokio::test]
async fn test_failed_crawl_keeps_earlier_updates() {
    let mut ctx = TestHarness::new().await;
    ctx.origin
        .page("/a.js", "a", None)
        .page("/b.js", "b", None);
    ctx.seed(&["/a.js", "/b.js"]).await;
    ctx.crawler().crawl(None).await.unwrap();

    ctx.origin
        .page("/a.js", "a2", None)
        .status("/b.js", 503)
        .delay("/b.js", Duration::from_millis(50));
    ctx.reload().await;
    assert!(ctx.crawler().crawl(None).await.is_err());

    // The modification was persisted even though the run failed.
    let stored = ctx.stored("/a.js").await.unwrap();
    assert_eq!(stored.content_hash, Some(ContentHash::of(b"a2")));
}

#[tokio::test]
async fn test_archive_snapshots_chain_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = TestHarness::new().await;
    ctx.origin
        .page("/index.html", r#""/logo.svg""#, Some("\"i1\""))
        .page("/logo.svg", "<svg/>", Some("\"l1\""));
    ctx.seed(&["/"]).await;

    let first = ArchiveRun::new(dir.path(), "20240101T000000Z", None);
    ctx.crawler()
        .with_archive(first.clone())
        .crawl(None)
        .await
        .unwrap();
    ctx.store
        .set_state(LAST_ARCHIVE_KEY, &first.directory_name)
        .await
        .unwrap();

    ctx.reload().await;
    let previous = ctx.store.get_state(LAST_ARCHIVE_KEY).await.unwrap();
    let second = ArchiveRun::new(dir.path(), "20240101T010000Z", previous);
    let changes = ctx
        .crawler()
        .with_archive(second)
        .crawl(None)
        .await
        .unwrap();
    assert!(changes.is_empty());

    for path in ["index.html", "logo.svg"] {
        let a = std::fs::read(dir.path().join("20240101T000000Z").join(path)).unwrap();
        let b = std::fs::read(dir.path().join("20240101T010000Z").join(path)).unwrap();
        assert_eq!(a, b);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(dir.path().join("20240101T010000Z/logo.svg")).unwrap();
        assert_eq!(meta.nlink(), 2);
    }
}

// =============================================================================
// Coordinator scenarios
// =============================================================================

fn known(path: &str, body: &str) -> PathRecord {
    PathRecord::known(path, ContentHash::of(body.as_bytes()), None)
}

async fn next_change_set(
    notifications: &mut tokio::sync::broadcast::Receiver<ChangeNotification>,
) -> change_detector::ChangeSet {
    loop {
        if let ChangeNotification::Change { changes, .. } = notifications.recv().await.unwrap() {
            return changes.await.unwrap();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_cycles_back_to_polling() {
    let origin = MockFetcher::shared();
    origin
        .page("/index.html", r#""/new.js""#, None)
        .page("/new.js", "new", None);
    let store = Arc::new(MemoryStore::with_records(vec![known("/index.html", "old")]));
    let config = DetectorConfig::new(Url::parse("http://example.com").unwrap())
        .with_polling_interval(Duration::from_secs(2))
        .with_settle_delay(Duration::from_secs(5));

    let coordinator = ChangeCoordinator::new(config, origin.clone(), store.clone())
        .await
        .unwrap();
    let mut notifications = coordinator.subscribe();
    let mut state = coordinator.state();
    coordinator.start();

    let first = next_change_set(&mut notifications).await;
    assert_eq!(first.modified, vec!["/index.html"]);
    assert_eq!(first.added, vec!["/new.js"]);
    assert_eq!(coordinator.records().len(), 2);

    state
        .wait_for(|s| *s == CoordinatorState::Polling)
        .await
        .unwrap();

    // A later edit is picked up by the restarted poller.
    origin.page("/new.js", "newer", None);
    let second = next_change_set(&mut notifications).await;
    assert_eq!(second.modified, vec!["/new.js"]);
    assert_eq!(store.get("/new.js"), Some(known("/new.js", "newer")));

    coordinator.destroy().await;
    assert_eq!(*state.borrow(), CoordinatorState::Stopped);
}

#[tokio::test]
async fn test_coordinator_rejects_invalid_config() {
    let origin = MockFetcher::shared();
    let store = Arc::new(MemoryStore::new());
    let config = DetectorConfig::new(Url::parse("http://example.com").unwrap()).with_archive(
        ArchiveConfig {
            enabled: true,
            base_path: None,
        },
    );

    let result = ChangeCoordinator::new(config, origin, store).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_possible_change_names_the_trigger() {
    let origin = MockFetcher::shared();
    origin.page("/a.js", "a", None);
    let store = Arc::new(MemoryStore::with_records(vec![
        known("/a.js", "a"),
        known("/gone.html", "x"),
    ]));
    let config = DetectorConfig::new(Url::parse("http://example.com").unwrap());

    let coordinator = ChangeCoordinator::new(config, origin.clone(), store)
        .await
        .unwrap();
    let mut notifications = coordinator.subscribe();
    coordinator.start();

    match notifications.recv().await.unwrap() {
        ChangeNotification::PossibleChange { path, change_type } => {
            assert_eq!(path, "/gone.html");
            assert_eq!(change_type, ChangeType::Removed);
        }
        other => panic!("unexpected notification: {other:?}"),
    }
    match notifications.recv().await.unwrap() {
        ChangeNotification::Change {
            first_path,
            first_change_type,
            changes,
        } => {
            assert_eq!(first_path, "/gone.html");
            assert_eq!(first_change_type, ChangeType::Removed);
            assert_eq!(changes.await.unwrap().removed, vec!["/gone.html"]);
        }
        other => panic!("unexpected notification: {other:?}"),
    }

    coordinator.destroy().await;
}
