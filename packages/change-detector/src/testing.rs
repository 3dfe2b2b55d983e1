//! Testing utilities including a scripted origin.
//!
//! [`MockFetcher`] behaves like a small static web server: pages answer 200
//! (or 304 when the request's validator matches), unknown paths answer 404,
//! and individual paths can be scripted to return any status or fail at the
//! transport level. Every request is recorded for assertions.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{FetchError, FetchResult};
use crate::traits::{FetchResponse, Fetcher};

#[derive(Debug, Clone)]
enum Route {
    Page { body: Bytes, etag: Option<String> },
    Status(u16),
    TransportError,
}

/// A request seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub path: String,
    pub validator: Option<String>,
}

/// Scripted [`Fetcher`] for tests.
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Route>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<MockRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            routes: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Serve `body` at `path` with an optional ETag.
    pub fn page(&self, path: &str, body: impl Into<Bytes>, etag: Option<&str>) -> &Self {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route::Page {
                body: body.into(),
                etag: etag.map(str::to_string),
            },
        );
        self
    }

    /// Answer `path` with a bare status code.
    pub fn status(&self, path: &str, status: u16) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Route::Status(status));
        self
    }

    /// Fail requests for `path` before any response.
    pub fn transport_error(&self, path: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Route::TransportError);
        self
    }

    /// Forget `path`; it answers 404 from now on.
    pub fn remove(&self, path: &str) -> &Self {
        self.routes.lock().unwrap().remove(path);
        self
    }

    /// Delay responses for `path`.
    pub fn delay(&self, path: &str, delay: Duration) -> &Self {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
        self
    }

    /// Hold every new request until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// How many times `path` was requested.
    pub fn fetch_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    /// Requests currently waiting on a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous requests observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, path: &str, validator: Option<&str>) -> FetchResult<FetchResponse> {
        let route = self.routes.lock().unwrap().get(path).cloned();
        match route {
            Some(Route::Page { body, etag }) => {
                if validator.is_some() && validator == etag.as_deref() {
                    Ok(FetchResponse::new(304, etag, Bytes::new()))
                } else {
                    Ok(FetchResponse::new(200, etag, body))
                }
            }
            Some(Route::Status(status)) => Ok(FetchResponse::new(status, None, Bytes::new())),
            Some(Route::TransportError) => Err(FetchError::Transport {
                path: path.to_string(),
                source: "connection reset by mock".into(),
            }),
            None => Ok(FetchResponse::new(404, None, Bytes::new())),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, path: &str, validator: Option<&str>) -> FetchResult<FetchResponse> {
        self.requests.lock().unwrap().push(MockRequest {
            path: path.to_string(),
            validator: validator.map(str::to_string),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let delay = self.delays.lock().unwrap().get(path).copied();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            // Let sibling fetches start before this one settles.
            None => tokio::task::yield_now().await,
        }

        self.respond(path, validator)
    }
}
