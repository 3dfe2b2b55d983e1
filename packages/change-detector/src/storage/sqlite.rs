//! SQLite record store.
//!
//! The production backend. One row per path; hashes are stored as 32-byte
//! BLOBs and tombstones as NULL hashes.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;

use super::PathRecordStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{ContentHash, PathRecord};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite database.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://./db.sqlite` - File-based database
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(backend)?
            .create_if_missing(true);

        // A single connection keeps `sqlite::memory:` databases shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS path_records (
                path TEXT PRIMARY KEY,
                hash BLOB,
                validator TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct PathRecordRow {
    path: String,
    hash: Option<Vec<u8>>,
    validator: Option<String>,
}

impl TryFrom<PathRecordRow> for PathRecord {
    type Error = StoreError;

    fn try_from(row: PathRecordRow) -> Result<Self, Self::Error> {
        let content_hash = match row.hash {
            Some(bytes) => Some(ContentHash::from_slice(&bytes).ok_or_else(|| {
                StoreError::Corrupt {
                    path: row.path.clone(),
                    reason: format!("hash is {} bytes, expected 32", bytes.len()),
                }
            })?),
            None => None,
        };
        Ok(PathRecord {
            path: row.path,
            content_hash,
            validator: row.validator,
        })
    }
}

#[async_trait]
impl PathRecordStore for SqliteStore {
    async fn load_all(&self) -> StoreResult<Vec<PathRecord>> {
        let rows: Vec<PathRecordRow> =
            sqlx::query_as("SELECT path, hash, validator FROM path_records ORDER BY rowid")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        rows.into_iter().map(PathRecord::try_from).collect()
    }

    async fn upsert(&self, record: &PathRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO path_records (path, hash, validator)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                validator = excluded.validator
            "#,
        )
        .bind(&record.path)
        .bind(record.content_hash.map(|h| h.as_bytes().to_vec()))
        .bind(record.validator.as_deref())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn remove(&self, path: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM path_records WHERE path = ?1")
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_state(&self, key: &str) -> StoreResult<Option<String>> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        Ok(value.map(|(v,)| v))
    }

    async fn set_state(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO state (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}
