use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Document name appended to directory paths (`/foo/` -> `/foo/index.html`).
pub const INDEX_DOCUMENT: &str = "index.html";

/// SHA-256 digest of a resource body. The authoritative identity of a path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn of(body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(body);
        Self(hasher.finalize().into())
    }

    /// Rebuild a hash from stored bytes. Returns `None` unless exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

/// Identity and freshness state for one path.
///
/// `content_hash` is `None` exactly when the path is believed not to exist at
/// the origin (never seen, or a tombstone left by a removal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRecord {
    pub path: String,
    pub content_hash: Option<ContentHash>,
    /// Origin-supplied cache validator (ETag). Advisory only.
    pub validator: Option<String>,
}

impl PathRecord {
    pub fn known(path: impl Into<String>, hash: ContentHash, validator: Option<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: Some(hash),
            validator,
        }
    }

    /// A record for a path that does not currently exist.
    pub fn tombstone(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: None,
            validator: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.content_hash.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Added => "added",
            ChangeType::Modified => "modified",
            ChangeType::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Result of a single poller probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Added,
    Modified,
    Removed,
}

impl PollOutcome {
    pub fn change_type(self) -> Option<ChangeType> {
        match self {
            PollOutcome::Unchanged => None,
            PollOutcome::Added => Some(ChangeType::Added),
            PollOutcome::Modified => Some(ChangeType::Modified),
            PollOutcome::Removed => Some(ChangeType::Removed),
        }
    }
}

impl From<ChangeType> for PollOutcome {
    fn from(change: ChangeType) -> Self {
        match change {
            ChangeType::Added => PollOutcome::Added,
            ChangeType::Modified => PollOutcome::Modified,
            ChangeType::Removed => PollOutcome::Removed,
        }
    }
}

/// Consolidated result of one detection cycle. The three lists are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: ChangeType, path: impl Into<String>) {
        let list = match change {
            ChangeType::Added => &mut self.added,
            ChangeType::Modified => &mut self.modified,
            ChangeType::Removed => &mut self.removed,
        };
        list.push(path.into());
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonicalize a path: directory paths get the index document appended.
pub fn normalize_path(path: &str) -> String {
    if path.ends_with('/') {
        format!("{path}{INDEX_DOCUMENT}")
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_content_hash_from_slice_rejects_wrong_length() {
        let hash = ContentHash::of(b"body");
        assert_eq!(ContentHash::from_slice(hash.as_bytes()), Some(hash));
        assert_eq!(ContentHash::from_slice(&[0u8; 31]), None);
    }

    #[test]
    fn test_normalize_path_appends_index() {
        assert_eq!(normalize_path("/"), "/index.html");
        assert_eq!(normalize_path("/docs/"), "/docs/index.html");
        assert_eq!(normalize_path("/a.js"), "/a.js");
    }

    #[test]
    fn test_change_set_push_routes_by_type() {
        let mut changes = ChangeSet::new();
        assert!(changes.is_empty());

        changes.push(ChangeType::Added, "/a");
        changes.push(ChangeType::Removed, "/b");
        changes.push(ChangeType::Modified, "/c");

        assert_eq!(changes.added, vec!["/a"]);
        assert_eq!(changes.removed, vec!["/b"]);
        assert_eq!(changes.modified, vec!["/c"]);
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_tombstone_is_absent() {
        assert!(!PathRecord::tombstone("/gone").is_present());
        assert!(PathRecord::known("/here", ContentHash::of(b"x"), None).is_present());
    }

    #[test]
    fn test_poll_outcome_change_type() {
        assert_eq!(PollOutcome::Unchanged.change_type(), None);
        assert_eq!(PollOutcome::Removed.change_type(), Some(ChangeType::Removed));
        assert_eq!(PollOutcome::from(ChangeType::Added), PollOutcome::Added);
    }
}
