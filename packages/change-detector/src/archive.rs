//! Snapshot archival.
//!
//! Each crawl writes into `base_path/<timestamp>/<path>`. Resources that did
//! not change are hard-linked from the previous snapshot, so every snapshot
//! directory is a complete tree while unchanged bytes are stored once.

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Component, Path, PathBuf};

/// ISO-8601 basic format, e.g. `20240131T081502Z`.
pub fn snapshot_name(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Archive target for one crawl run.
#[derive(Debug, Clone)]
pub struct ArchiveRun {
    pub base_path: PathBuf,
    pub directory_name: String,
    /// Snapshot to hard-link unchanged resources from
    pub prev_directory_name: Option<String>,
}

impl ArchiveRun {
    pub fn new(
        base_path: impl Into<PathBuf>,
        directory_name: impl Into<String>,
        prev_directory_name: Option<String>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            directory_name: directory_name.into(),
            prev_directory_name,
        }
    }

    /// A run named after the current time.
    pub fn starting_now(base_path: impl Into<PathBuf>, prev_directory_name: Option<String>) -> Self {
        Self::new(base_path, snapshot_name(Utc::now()), prev_directory_name)
    }

    pub fn directory(&self) -> PathBuf {
        self.base_path.join(&self.directory_name)
    }

    /// Where `path` lives in this run's snapshot. `None` for paths that would
    /// escape the snapshot directory.
    pub fn file_for(&self, path: &str) -> Option<PathBuf> {
        snapshot_file(&self.directory(), path)
    }

    fn previous_file_for(&self, path: &str) -> Option<PathBuf> {
        let prev = self.prev_directory_name.as_ref()?;
        snapshot_file(&self.base_path.join(prev), path)
    }

    /// Write a new or modified body.
    pub async fn store_body(&self, path: &str, body: &[u8]) -> io::Result<()> {
        let target = self.file_for(path).ok_or_else(|| escape_error(path))?;
        create_parent(&target).await?;
        tokio::fs::write(&target, body).await
    }

    /// Hard-link an unchanged resource from the previous snapshot. Returns
    /// `false` when there is no previous snapshot to link from.
    pub async fn link_previous(&self, path: &str) -> io::Result<bool> {
        let Some(source) = self.previous_file_for(path) else {
            return Ok(false);
        };
        let target = self.file_for(path).ok_or_else(|| escape_error(path))?;
        create_parent(&target).await?;
        tokio::fs::hard_link(&source, &target).await?;
        Ok(true)
    }
}

fn snapshot_file(directory: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe || relative.as_os_str().is_empty() {
        return None;
    }
    Some(directory.join(relative))
}

async fn create_parent(target: &Path) -> io::Result<()> {
    match target.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

fn escape_error(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{path} escapes the snapshot directory"),
    )
}
