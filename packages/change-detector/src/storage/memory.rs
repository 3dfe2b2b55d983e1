//! In-memory store for tests and dry runs. Data is lost on drop.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::PathRecordStore;
use crate::error::StoreResult;
use crate::types::PathRecord;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<IndexMap<String, PathRecord>>,
    state: RwLock<HashMap<String, String>>,
    upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PathRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write().unwrap();
            for record in records {
                map.insert(record.path.clone(), record);
            }
        }
        store
    }

    pub fn get(&self, path: &str) -> Option<PathRecord> {
        self.records.read().unwrap().get(path).cloned()
    }

    /// Number of `upsert` calls made so far.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PathRecordStore for MemoryStore {
    async fn load_all(&self) -> StoreResult<Vec<PathRecord>> {
        Ok(self.records.read().unwrap().values().cloned().collect())
    }

    async fn upsert(&self, record: &PathRecord) -> StoreResult<()> {
        self.records
            .write()
            .unwrap()
            .insert(record.path.clone(), record.clone());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, path: &str) -> StoreResult<bool> {
        Ok(self.records.write().unwrap().shift_remove(path).is_some())
    }

    async fn get_state(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.read().unwrap().get(key).cloned())
    }

    async fn set_state(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentHash;

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let store = MemoryStore::with_records(vec![
            PathRecord::tombstone("/a"),
            PathRecord::tombstone("/b"),
        ]);

        store
            .upsert(&PathRecord::known("/a", ContentHash::of(b"a"), Some("\"v1\"".into())))
            .await
            .unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].path, "/a");
        assert!(all[0].is_present());
        assert_eq!(store.upsert_count(), 1);
    }

    #[tokio::test]
    async fn test_state_and_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get_state("k").await.unwrap(), None);
        store.set_state("k", "v").await.unwrap();
        assert_eq!(store.get_state("k").await.unwrap().as_deref(), Some("v"));

        store.upsert(&PathRecord::tombstone("/x")).await.unwrap();
        assert!(store.remove("/x").await.unwrap());
        assert!(!store.remove("/x").await.unwrap());
    }
}
