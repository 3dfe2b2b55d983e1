// Common test utilities

use std::sync::Arc;

use change_detector::testing::MockFetcher;
use change_detector::{normalize_path, Crawler, PathRecord, PathRecordMap, PathRecordStore, SqliteStore};

pub const ORIGIN_HOST: &str = "example.com";

/// A scripted origin plus an in-memory SQLite store.
pub struct TestHarness {
    pub origin: Arc<MockFetcher>,
    pub store: Arc<SqliteStore>,
    pub records: PathRecordMap,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self {
            origin: MockFetcher::shared(),
            store: Arc::new(
                SqliteStore::in_memory()
                    .await
                    .expect("Failed to open in-memory store"),
            ),
            records: PathRecordMap::new(),
        }
    }

    /// Store tombstones for `paths` and reload the record map.
    pub async fn seed(&mut self, paths: &[&str]) {
        for path in paths {
            self.store
                .upsert(&PathRecord::tombstone(normalize_path(path)))
                .await
                .expect("Failed to seed path");
        }
        self.reload().await;
    }

    /// Rebuild the record map from the store, as a restarted process would.
    pub async fn reload(&mut self) {
        let records = self.store.load_all().await.expect("Failed to load records");
        self.records = PathRecordMap::from_records(records);
    }

    pub fn crawler(&self) -> Crawler {
        Crawler::new(
            self.origin.clone(),
            self.records.clone(),
            self.store.clone(),
            Some(ORIGIN_HOST),
        )
    }

    pub async fn stored(&self, path: &str) -> Option<PathRecord> {
        self.store
            .load_all()
            .await
            .expect("Failed to load records")
            .into_iter()
            .find(|r| r.path == path)
    }
}
