//! HTTP fetcher backed by a pooled `reqwest::Client`.
//!
//! One client (and so one connection pool) is shared by the poller and the
//! crawler through an `Arc<HttpFetcher>`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ETAG, IF_NONE_MATCH};
use tracing::{debug, warn};
use url::Url;

use crate::config::RequestOptions;
use crate::error::{ConfigError, FetchError, FetchResult};
use crate::traits::{FetchResponse, Fetcher};

pub struct HttpFetcher {
    client: reqwest::Client,
    origin: Url,
}

impl HttpFetcher {
    pub fn new(origin: Url, options: &RequestOptions) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::Invalid {
                key: "request.headers",
                reason: e.to_string(),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| ConfigError::Invalid {
                key: "request.headers",
                reason: e.to_string(),
            })?;
            headers.insert(name, value);
        }

        // Redirects surface as unexpected statuses rather than being followed.
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent);
        }

        let client = builder.build().map_err(|e| ConfigError::Invalid {
            key: "request",
            reason: e.to_string(),
        })?;

        Ok(Self { client, origin })
    }

    /// Use an existing client (and its pool) instead of building one.
    pub fn with_client(origin: Url, client: reqwest::Client) -> Self {
        Self { client, origin }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn resolve(&self, path: &str) -> FetchResult<Url> {
        // "//host/..." would resolve to another origin.
        if !path.starts_with('/') || path.starts_with("//") {
            return Err(FetchError::InvalidPath {
                path: path.to_string(),
            });
        }
        self.origin.join(path).map_err(|_| FetchError::InvalidPath {
            path: path.to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str, validator: Option<&str>) -> FetchResult<FetchResponse> {
        let url = self.resolve(path)?;
        debug!(path = %path, conditional = validator.is_some(), "HTTP fetch starting");

        let mut request = self.client.get(url);
        if let Some(validator) = validator {
            request = request.header(IF_NONE_MATCH, validator);
        }

        let response = request.send().await.map_err(|e| {
            warn!(path = %path, error = %e, "HTTP request failed");
            FetchError::Transport {
                path: path.to_string(),
                source: Box::new(e),
            }
        })?;

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await.map_err(|e| FetchError::Body {
            path: path.to_string(),
            source: Box::new(e),
        })?;

        Ok(FetchResponse {
            status,
            validator: etag,
            body,
        })
    }
}
