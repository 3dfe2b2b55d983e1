//! Round-robin sampler.
//!
//! The poller probes one path per tick with a conditional fetch and reports
//! the first sign of drift. It never writes to the record map; the crawler
//! owns authoritative updates.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FetchResult, PollerError};
use crate::records::PathRecordMap;
use crate::traits::{FetchOutcome, Fetcher};
use crate::types::{ChangeType, ContentHash, PathRecord, PollOutcome};

/// Evidence of drift at one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSignal {
    pub path: String,
    pub change_type: ChangeType,
}

pub struct Poller {
    fetcher: Arc<dyn Fetcher>,
    records: PathRecordMap,
    interval: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl Poller {
    pub fn new(fetcher: Arc<dyn Fetcher>, records: PathRecordMap, interval: Duration) -> Self {
        Self {
            fetcher,
            records,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Classify the current state of one path against its record.
    ///
    /// Statuses outside 200/304/403/404 are logged and read as `Unchanged`;
    /// transport failures are returned to the caller.
    pub async fn probe(&self, record: &PathRecord) -> FetchResult<PollOutcome> {
        probe_record(self.fetcher.as_ref(), record).await
    }

    /// Spawn the tick loop. Any loop already running is stopped first.
    ///
    /// The first probe runs immediately; each following probe is scheduled
    /// `interval` after the previous one settles. The task ends with
    /// [`PollerError::EmptyRecordSet`] if there is nothing to poll.
    pub fn start(&self, signals: mpsc::Sender<PollSignal>) -> JoinHandle<Result<(), PollerError>> {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock_running().replace(token.clone()) {
            previous.cancel();
        }

        let known = self.records.len();
        info!(
            paths = known,
            interval_ms = self.interval.as_millis() as u64,
            cycle_secs = self.interval.as_secs_f64() * known as f64,
            "Poller starting"
        );

        tokio::spawn(run(
            self.fetcher.clone(),
            self.records.clone(),
            self.interval,
            token,
            signals,
        ))
    }

    /// Cancel the pending tick. An in-flight probe completes but its result is
    /// discarded. Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.lock_running().take() {
            debug!("Poller stopping");
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn run(
    fetcher: Arc<dyn Fetcher>,
    records: PathRecordMap,
    interval: Duration,
    token: CancellationToken,
    signals: mpsc::Sender<PollSignal>,
) -> Result<(), PollerError> {
    // is_running() turns false however the loop ends.
    let _running = token.clone().drop_guard();
    let mut cursor = 0;

    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        let record = match records.get_index(cursor) {
            Some(record) => record,
            None if records.is_empty() => return Err(PollerError::EmptyRecordSet),
            None => {
                cursor = 0;
                continue;
            }
        };
        cursor += 1;

        let outcome = probe_record(fetcher.as_ref(), &record).await;
        if token.is_cancelled() {
            return Ok(());
        }

        match outcome {
            Ok(outcome) => {
                if let Some(change_type) = outcome.change_type() {
                    info!(path = %record.path, change = %change_type, "Poller observed drift");
                    let signal = PollSignal {
                        path: record.path.clone(),
                        change_type,
                    };
                    if signals.send(signal).await.is_err() {
                        debug!("Signal receiver dropped, poller exiting");
                        return Ok(());
                    }
                }
            }
            Err(e) => warn!(path = %record.path, error = %e, "Probe failed, skipping"),
        }

        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn probe_record(fetcher: &dyn Fetcher, record: &PathRecord) -> FetchResult<PollOutcome> {
    let response = fetcher
        .fetch(&record.path, record.validator.as_deref())
        .await?;

    let outcome = match response.classify() {
        FetchOutcome::NotModified => PollOutcome::Unchanged,
        FetchOutcome::Body { body, .. } => match record.content_hash {
            None => PollOutcome::Added,
            Some(stored) if stored != ContentHash::of(&body) => PollOutcome::Modified,
            // Validator drift alone; the crawler persists the new validator.
            Some(_) => PollOutcome::Unchanged,
        },
        FetchOutcome::Absent if record.is_present() => PollOutcome::Removed,
        FetchOutcome::Absent => PollOutcome::Unchanged,
        FetchOutcome::Unexpected(status) => {
            warn!(path = %record.path, status, "Unexpected status while polling");
            PollOutcome::Unchanged
        }
    };

    debug!(path = %record.path, ?outcome, "Probe settled");
    Ok(outcome)
}
