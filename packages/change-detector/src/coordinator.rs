//! Poll / settle / crawl state machine.
//!
//! The coordinator owns the shared record map and runs exactly one of the
//! poller and the crawler at a time:
//!
//! ```text
//! Polling --signal--> Settling --delay--> Crawling --ok--> Polling
//!                                             |
//!                                             +--err--> Failed
//! ```
//!
//! # Notifications
//!
//! Each crawl publishes a [`ChangeNotification::PossibleChange`] followed by
//! a [`ChangeNotification::Change`] carrying a cloneable future for the
//! crawl's [`ChangeSet`]. Both go out on a broadcast channel, so a slow
//! subscriber may lag; the change future itself is never lost.
//!
//! # Shutdown
//!
//! [`ChangeCoordinator::destroy`] stops the poller right away. A crawl that
//! is already running is allowed to finish and publish before the loop ends.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveRun;
use crate::config::DetectorConfig;
use crate::crawler::Crawler;
use crate::error::{CrawlFailure, PollerError, Result};
use crate::poller::{PollSignal, Poller};
use crate::records::PathRecordMap;
use crate::storage::{PathRecordStore, LAST_ARCHIVE_KEY};
use crate::traits::Fetcher;
use crate::types::{ChangeSet, ChangeType};

/// Buffered notifications before slow subscribers start lagging.
const NOTIFICATION_CAPACITY: usize = 64;

const SIGNAL_CAPACITY: usize = 16;

/// Resolves to the crawl's change set once the whole fan-out has settled.
pub type ChangeSetFuture = Shared<BoxFuture<'static, std::result::Result<ChangeSet, CrawlFailure>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Polling,
    Settling,
    Crawling,
    /// A crawl or the poller failed; nothing runs until restarted
    Failed,
    Stopped,
}

#[derive(Clone)]
pub enum ChangeNotification {
    /// The poller's evidence that triggered a crawl
    PossibleChange { path: String, change_type: ChangeType },
    /// Published with the crawl; `changes` settles when it does
    Change {
        first_path: String,
        first_change_type: ChangeType,
        changes: ChangeSetFuture,
    },
}

impl fmt::Debug for ChangeNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeNotification::PossibleChange { path, change_type } => f
                .debug_struct("PossibleChange")
                .field("path", path)
                .field("change_type", change_type)
                .finish(),
            ChangeNotification::Change {
                first_path,
                first_change_type,
                ..
            } => f
                .debug_struct("Change")
                .field("first_path", first_path)
                .field("first_change_type", first_change_type)
                .finish_non_exhaustive(),
        }
    }
}

pub struct ChangeCoordinator {
    config: DetectorConfig,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn PathRecordStore>,
    records: PathRecordMap,
    last_archive: Option<String>,
    notifications: broadcast::Sender<ChangeNotification>,
    state: Arc<watch::Sender<CoordinatorState>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeCoordinator {
    /// Validate `config` and load every stored record.
    pub async fn new(
        config: DetectorConfig,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn PathRecordStore>,
    ) -> Result<Self> {
        config.validate()?;

        let records = PathRecordMap::from_records(store.load_all().await?);
        let last_archive = store.get_state(LAST_ARCHIVE_KEY).await?;
        info!(
            origin = %config.origin,
            paths = records.len(),
            last_archive = ?last_archive,
            "Change coordinator loaded"
        );

        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (state, _) = watch::channel(CoordinatorState::Polling);

        Ok(Self {
            config,
            fetcher,
            store,
            records,
            last_archive,
            notifications,
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Spawn the state machine. Calling it again while it runs does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            warn!("Change coordinator already started");
            return;
        }

        let machine = Machine {
            config: self.config.clone(),
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            records: self.records.clone(),
            poller: Poller::new(
                self.fetcher.clone(),
                self.records.clone(),
                self.config.polling_interval,
            ),
            last_archive: self.last_archive.clone(),
            notifications: self.notifications.clone(),
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
        };
        *task = Some(tokio::spawn(machine.run()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.notifications.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    pub fn records(&self) -> PathRecordMap {
        self.records.clone()
    }

    /// Stop polling, wait for any running crawl to publish, and release the
    /// fetcher.
    pub async fn destroy(self) {
        info!("Change coordinator shutting down");
        self.shutdown.cancel();

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    error!(error = %e, "Change coordinator task panicked");
                }
            }
            None => {
                self.state.send_replace(CoordinatorState::Stopped);
            }
        }
    }
}

/// The spawned half of the coordinator.
struct Machine {
    config: DetectorConfig,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn PathRecordStore>,
    records: PathRecordMap,
    poller: Poller,
    last_archive: Option<String>,
    notifications: broadcast::Sender<ChangeNotification>,
    state: Arc<watch::Sender<CoordinatorState>>,
    shutdown: CancellationToken,
}

impl Machine {
    async fn run(mut self) {
        let (signal_tx, mut signals) = mpsc::channel(SIGNAL_CAPACITY);

        loop {
            let Some(signal) = self.poll(&signal_tx, &mut signals).await else {
                return;
            };

            self.enter(CoordinatorState::Settling);
            info!(
                path = %signal.path,
                change = %signal.change_type,
                delay_ms = self.config.settle_delay.as_millis() as u64,
                "Possible change, settling before crawl"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.enter(CoordinatorState::Stopped);
                    return;
                }
                _ = tokio::time::sleep(self.config.settle_delay) => {}
            }

            self.enter(CoordinatorState::Crawling);
            if !self.crawl(signal).await {
                self.enter(CoordinatorState::Failed);
                return;
            }

            if self.shutdown.is_cancelled() {
                self.enter(CoordinatorState::Stopped);
                return;
            }
            // Evidence gathered before the crawl is already accounted for.
            while signals.try_recv().is_ok() {}
        }
    }

    /// Run the poller until it signals. `None` ends the machine.
    async fn poll(
        &self,
        signal_tx: &mpsc::Sender<PollSignal>,
        signals: &mut mpsc::Receiver<PollSignal>,
    ) -> Option<PollSignal> {
        self.enter(CoordinatorState::Polling);
        let mut poll_task = self.poller.start(signal_tx.clone());

        let signal = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            signal = signals.recv() => signal,
            result = &mut poll_task => {
                match result {
                    Ok(Err(e)) => error!(error = %e, "Poller failed"),
                    Ok(Ok(())) => error!("Poller exited unexpectedly"),
                    Err(e) => error!(error = %e, "Poller task panicked"),
                }
                self.enter(CoordinatorState::Failed);
                return None;
            }
        };

        stop_poller(&self.poller, poll_task).await;
        while signals.try_recv().is_ok() {}

        if signal.is_none() {
            self.enter(CoordinatorState::Stopped);
        }
        signal
    }

    /// Crawl every known path and publish the result. Returns `false` when the
    /// crawl failed.
    async fn crawl(&mut self, signal: PollSignal) -> bool {
        let archive = self
            .config
            .archive
            .active_base_path()
            .map(|base| ArchiveRun::starting_now(base, self.last_archive.clone()));

        let mut crawler = Crawler::new(
            self.fetcher.clone(),
            self.records.clone(),
            self.store.clone(),
            self.config.origin_host(),
        );
        if let Some(archive) = archive.clone() {
            crawler = crawler.with_archive(archive);
        }
        if let Some(limit) = self.config.max_crawl_concurrency {
            crawler = crawler.with_max_concurrency(limit);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let changes: ChangeSetFuture = result_rx
            .map(|received| received.unwrap_or(Err(CrawlFailure::Abandoned)))
            .boxed()
            .shared();

        self.publish(ChangeNotification::PossibleChange {
            path: signal.path.clone(),
            change_type: signal.change_type,
        });
        self.publish(ChangeNotification::Change {
            first_path: signal.path,
            first_change_type: signal.change_type,
            changes,
        });

        match crawler.crawl(None).await {
            Ok(change_set) => {
                if let Some(archive) = archive {
                    self.record_archive(archive.directory_name).await;
                }
                let _ = result_tx.send(Ok(change_set));
                true
            }
            Err(e) => {
                error!(error = %e, "Crawl failed, coordinator stopping");
                let _ = result_tx.send(Err(e.into()));
                false
            }
        }
    }

    async fn record_archive(&mut self, directory_name: String) {
        if let Err(e) = self.store.set_state(LAST_ARCHIVE_KEY, &directory_name).await {
            warn!(error = %e, directory = %directory_name, "Failed to persist archive directory");
        }
        self.last_archive = Some(directory_name);
    }

    fn publish(&self, notification: ChangeNotification) {
        let receivers = self.notifications.send(notification).unwrap_or(0);
        debug!(receivers, "Published notification");
    }

    fn enter(&self, state: CoordinatorState) {
        debug!(?state, "Coordinator state");
        self.state.send_replace(state);
    }
}

/// Stop the poller and let an in-flight probe settle, so polling never
/// overlaps crawling.
async fn stop_poller(poller: &Poller, poll_task: JoinHandle<std::result::Result<(), PollerError>>) {
    poller.stop();
    match poll_task.await {
        Ok(Err(e)) => warn!(error = %e, "Poller failed while stopping"),
        Ok(Ok(())) => {}
        Err(e) => error!(error = %e, "Poller task panicked while stopping"),
    }
}
