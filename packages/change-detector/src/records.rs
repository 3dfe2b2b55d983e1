//! Shared path-record map.
//!
//! One map is shared by the poller and the crawler. The coordinator keeps
//! them from running at the same time; the lock only makes each individual
//! read or write atomic. Guards are never held across an `.await`.

use indexmap::IndexMap;
use std::sync::{Arc, RwLock};

use crate::types::PathRecord;

/// Cloneable handle to the insertion-ordered record map.
#[derive(Clone, Default)]
pub struct PathRecordMap {
    inner: Arc<RwLock<IndexMap<String, PathRecord>>>,
}

impl PathRecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = PathRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn get(&self, path: &str) -> Option<PathRecord> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Record at position `index` in insertion order.
    pub fn get_index(&self, index: usize) -> Option<PathRecord> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get_index(index)
            .map(|(_, record)| record.clone())
    }

    /// Insert or replace a record, returning the previous one.
    pub fn insert(&self, record: PathRecord) -> Option<PathRecord> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.path.clone(), record)
    }

    /// Snapshot of all known paths in insertion order.
    pub fn paths(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PathRecordMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRecordMap")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentHash;

    #[test]
    fn test_insert_keeps_position_on_replace() {
        let map = PathRecordMap::from_records(vec![
            PathRecord::tombstone("/a"),
            PathRecord::tombstone("/b"),
        ]);

        let previous = map.insert(PathRecord::known("/a", ContentHash::of(b"a"), None));
        assert_eq!(previous, Some(PathRecord::tombstone("/a")));

        assert_eq!(map.paths(), vec!["/a", "/b"]);
        assert!(map.get_index(0).unwrap().is_present());
    }

    #[test]
    fn test_clones_share_state() {
        let map = PathRecordMap::new();
        let other = map.clone();
        other.insert(PathRecord::tombstone("/x"));
        assert_eq!(map.len(), 1);
        assert!(map.get("/x").is_some());
        assert!(map.get_index(1).is_none());
    }
}
