use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::PathRecord;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// State key holding the directory name of the last completed archive snapshot.
pub const LAST_ARCHIVE_KEY: &str = "last_archive_directory";

/// Durable path-record storage, owned outside the engine.
///
/// `upsert` is awaited right after each authoritative classification, before
/// the change is reported, so durability always precedes notification.
#[async_trait]
pub trait PathRecordStore: Send + Sync {
    /// Every stored record, in the order they were first inserted.
    async fn load_all(&self) -> StoreResult<Vec<PathRecord>>;

    async fn upsert(&self, record: &PathRecord) -> StoreResult<()>;

    /// Operator pruning. The detection engine never calls this.
    async fn remove(&self, path: &str) -> StoreResult<bool>;

    /// Auxiliary scalar state (e.g. [`LAST_ARCHIVE_KEY`]).
    async fn get_state(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_state(&self, key: &str, value: &str) -> StoreResult<()>;
}
