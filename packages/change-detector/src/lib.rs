//! Change detection for a remote set of URL paths.
//!
//! A cheap [`Poller`] samples one path at a time; when it sees drift the
//! [`ChangeCoordinator`] pauses it, waits for the origin to settle, and runs
//! the authoritative [`Crawler`] over every reachable path. The result is a
//! [`ChangeSet`] published to subscribers.

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod crawler;
pub mod error;
pub mod extractor;
pub mod http;
pub mod poller;
pub mod records;
pub mod storage;
pub mod testing;
pub mod traits;
pub mod types;

pub use archive::ArchiveRun;
pub use config::{ArchiveConfig, DetectorConfig, RequestOptions};
pub use coordinator::{ChangeCoordinator, ChangeNotification, ChangeSetFuture, CoordinatorState};
pub use crawler::Crawler;
pub use error::{
    ConfigError, CrawlError, CrawlFailure, DetectorError, FetchError, PollerError, Result,
    StoreError,
};
pub use extractor::PathExtractor;
pub use http::HttpFetcher;
pub use poller::{PollSignal, Poller};
pub use records::PathRecordMap;
pub use storage::{MemoryStore, PathRecordStore, SqliteStore, LAST_ARCHIVE_KEY};
pub use traits::{FetchOutcome, FetchResponse, Fetcher};
pub use types::{normalize_path, ChangeSet, ChangeType, ContentHash, PathRecord, PollOutcome};
