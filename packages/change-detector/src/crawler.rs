//! Authoritative recursive crawl.
//!
//! Starting from a set of seed paths, every reachable path is fetched once,
//! classified against its stored record, persisted, optionally archived, and
//! scanned for further path literals. The crawl future resolves only after
//! the whole fan-out has settled.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveRun;
use crate::error::{CrawlError, CrawlResult};
use crate::extractor::PathExtractor;
use crate::records::PathRecordMap;
use crate::storage::PathRecordStore;
use crate::traits::{FetchOutcome, Fetcher};
use crate::types::{normalize_path, ChangeSet, ChangeType, ContentHash, PathRecord};

pub struct Crawler {
    fetcher: Arc<dyn Fetcher>,
    records: PathRecordMap,
    store: Arc<dyn PathRecordStore>,
    extractor: PathExtractor,
    archive: Option<ArchiveRun>,
    max_concurrency: Option<usize>,
}

/// What one fetch contributed to the run.
struct Visit {
    seq: u64,
    path: String,
    change: Option<ChangeType>,
    persisted: bool,
    links: Vec<String>,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        records: PathRecordMap,
        store: Arc<dyn PathRecordStore>,
        origin_host: Option<&str>,
    ) -> Self {
        Self {
            fetcher,
            records,
            store,
            extractor: PathExtractor::new(origin_host),
            archive: None,
            max_concurrency: None,
        }
    }

    pub fn with_archive(mut self, archive: ArchiveRun) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Cap simultaneous fetches. Unbounded by default.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn archive(&self) -> Option<&ArchiveRun> {
        self.archive.as_ref()
    }

    /// Crawl from `seeds` (every known path when `None`) and return what
    /// changed, each list in discovery order.
    ///
    /// Any transport error or unexpected status fails the whole run. Records
    /// already persisted by then are kept.
    pub async fn crawl(&self, seeds: Option<Vec<String>>) -> CrawlResult<ChangeSet> {
        let seeds = seeds.unwrap_or_else(|| self.records.paths());
        info!(
            seeds = seeds.len(),
            archive = ?self.archive.as_ref().map(|a| a.directory()),
            "Starting crawl"
        );

        let mut visited = HashSet::new();
        let mut pending = VecDeque::new();
        let mut next_seq = 0u64;
        let mut schedule = |path: String, pending: &mut VecDeque<(u64, String)>| {
            let path = normalize_path(&path);
            if visited.insert(path.clone()) {
                pending.push_back((next_seq, path));
                next_seq += 1;
            }
        };
        for seed in seeds {
            schedule(seed, &mut pending);
        }

        let limit = self.max_concurrency.unwrap_or(usize::MAX);
        let mut in_flight = FuturesUnordered::new();
        let mut changes = Vec::new();
        let mut fetched = 0usize;
        let mut persisted = 0usize;

        loop {
            while in_flight.len() < limit {
                let Some((seq, path)) = pending.pop_front() else {
                    break;
                };
                in_flight.push(self.visit(seq, path));
            }

            let Some(result) = in_flight.next().await else {
                break;
            };

            let visit = match result {
                Ok(visit) => visit,
                Err(e) => {
                    // Started visits run to completion so the map never holds
                    // a record the store did not take.
                    while let Some(result) = in_flight.next().await {
                        if result.is_ok_and(|visit| visit.persisted) {
                            persisted += 1;
                        }
                    }
                    error!(
                        error = %e,
                        persisted,
                        abandoned = pending.len(),
                        "Crawl failed; records persisted earlier in this run are kept"
                    );
                    return Err(e);
                }
            };

            fetched += 1;
            if visit.persisted {
                persisted += 1;
            }
            if let Some(change) = visit.change {
                changes.push((visit.seq, change, visit.path));
            }
            for link in visit.links {
                schedule(link, &mut pending);
            }
        }

        changes.sort_by_key(|(seq, _, _)| *seq);
        let mut change_set = ChangeSet::new();
        for (_, change, path) in changes {
            change_set.push(change, path);
        }

        info!(
            fetched,
            persisted,
            added = change_set.added.len(),
            modified = change_set.modified.len(),
            removed = change_set.removed.len(),
            "Crawl completed"
        );
        Ok(change_set)
    }

    async fn visit(&self, seq: u64, path: String) -> CrawlResult<Visit> {
        let previous = self.records.get(&path);
        let stored_validator = previous.as_ref().and_then(|r| r.validator.clone());

        let response = self
            .fetcher
            .fetch(&path, stored_validator.as_deref())
            .await?;

        let mut visit = Visit {
            seq,
            path,
            change: None,
            persisted: false,
            links: Vec::new(),
        };

        match response.classify() {
            FetchOutcome::Body { body, validator } => {
                let hash = ContentHash::of(&body);
                let previous_hash = previous.as_ref().and_then(|r| r.content_hash);
                visit.change = match previous_hash {
                    None => Some(ChangeType::Added),
                    Some(stored) if stored != hash => Some(ChangeType::Modified),
                    Some(_) => None,
                };

                // Validator drift alone is persisted but not reported.
                if visit.change.is_some() || validator != stored_validator {
                    self.persist(PathRecord::known(&visit.path, hash, validator))
                        .await?;
                    visit.persisted = true;
                }

                if visit.change.is_some() {
                    self.archive_body(&visit.path, &body).await;
                } else {
                    self.archive_link(&visit.path).await;
                }

                visit.links = self.extractor.extract(&body);
                debug!(
                    path = %visit.path,
                    hash = %hash.to_hex(),
                    change = ?visit.change,
                    links = visit.links.len(),
                    "Fetched body"
                );
            }
            FetchOutcome::NotModified => {
                // Every link in an unchanged body is already a known path.
                self.archive_link(&visit.path).await;
            }
            FetchOutcome::Absent => {
                if previous.as_ref().is_some_and(PathRecord::is_present) {
                    self.persist(PathRecord::tombstone(&visit.path)).await?;
                    visit.persisted = true;
                    visit.change = Some(ChangeType::Removed);
                }
            }
            FetchOutcome::Unexpected(status) => {
                warn!(path = %visit.path, status, "Unexpected status while crawling");
                return Err(CrawlError::UnexpectedStatus {
                    path: visit.path,
                    status,
                });
            }
        }

        if let Some(change) = visit.change {
            info!(path = %visit.path, change = %change, "Change confirmed");
        }
        Ok(visit)
    }

    /// Store first; the shared map only sees records the store accepted.
    async fn persist(&self, record: PathRecord) -> CrawlResult<()> {
        self.store.upsert(&record).await?;
        self.records.insert(record);
        Ok(())
    }

    async fn archive_body(&self, path: &str, body: &[u8]) {
        let Some(archive) = &self.archive else { return };
        if archive.file_for(path).is_none() {
            debug!(path = %path, "Path not archivable, skipping");
            return;
        }
        if let Err(e) = archive.store_body(path, body).await {
            warn!(path = %path, error = %e, "Failed to archive body");
        }
    }

    async fn archive_link(&self, path: &str) {
        let Some(archive) = &self.archive else { return };
        if archive.file_for(path).is_none() {
            debug!(path = %path, "Path not archivable, skipping");
            return;
        }
        if let Err(e) = archive.link_previous(path).await {
            warn!(path = %path, error = %e, "Failed to link from previous snapshot");
        }
    }
}
