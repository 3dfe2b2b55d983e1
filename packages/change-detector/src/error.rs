//! Typed errors for the change detector.
//!
//! Uses `thiserror` for library errors (not `anyhow`); the hosting binary
//! wraps these with context.

use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a [`Fetcher`](crate::traits::Fetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (DNS, connect, reset, timeout)
    #[error("transport error for {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The path could not be joined onto the origin
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    /// The response body could not be read to the end
    #[error("failed to read body for {path}: {source}")]
    Body {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors raised by a [`PathRecordStore`](crate::storage::PathRecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stored row could not be decoded into a record
    #[error("corrupt record for {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Errors that abort a crawl.
///
/// Any of these rejects the whole run. Records persisted earlier in the same
/// run are not rolled back.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// A fetch failed mid-crawl
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The origin answered with a status outside 200/304/403/404
    #[error("unexpected status {status} for {path}")]
    UnexpectedStatus { path: String, status: u16 },

    /// Persisting a classification failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Cloneable crawl outcome carried by a published change future.
#[derive(Debug, Clone, Error)]
pub enum CrawlFailure {
    #[error("crawl failed: {0}")]
    Crawl(Arc<CrawlError>),

    /// The coordinator went away before the crawl settled
    #[error("crawl abandoned before it settled")]
    Abandoned,
}

impl From<CrawlError> for CrawlFailure {
    fn from(error: CrawlError) -> Self {
        CrawlFailure::Crawl(Arc::new(error))
    }
}

/// Errors that end the poll loop.
#[derive(Debug, Error)]
pub enum PollerError {
    /// There is nothing to poll
    #[error("the path record set can't be empty")]
    EmptyRecordSet,
}

/// Configuration errors, raised at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A value failed to parse
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// The configuration file could not be read or parsed
    #[error("failed to load config file: {0}")]
    File(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Top-level error for the coordinator and hosting process.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    #[error("poller failed: {0}")]
    Poller(#[from] PollerError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, DetectorError>;
