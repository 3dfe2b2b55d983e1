use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Default delay between poller probes.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// Default settle window between a poller signal and the crawl it triggers.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Options applied to every request sent to the origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout; `None` leaves it to the transport
    #[serde(default, with = "duration_ms_opt")]
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl RequestOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Snapshot archival settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub base_path: Option<PathBuf>,
}

impl ArchiveConfig {
    pub fn enabled_at(base_path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            base_path: Some(base_path.into()),
        }
    }

    /// The base path, if archival is switched on.
    pub fn active_base_path(&self) -> Option<&Path> {
        if self.enabled {
            self.base_path.as_deref()
        } else {
            None
        }
    }
}

/// Full configuration of the change detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Origin all paths are resolved against
    pub origin: Url,
    #[serde(default = "default_polling_interval", with = "duration_ms")]
    pub polling_interval: Duration,
    #[serde(default = "default_settle_delay", with = "duration_ms")]
    pub settle_delay: Duration,
    #[serde(default)]
    pub request: RequestOptions,
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Cap on concurrent crawl fetches; `None` is unbounded
    #[serde(default)]
    pub max_crawl_concurrency: Option<usize>,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_polling_interval() -> Duration {
    DEFAULT_POLLING_INTERVAL
}

fn default_settle_delay() -> Duration {
    DEFAULT_SETTLE_DELAY
}

fn default_database_url() -> String {
    "sqlite://./db.sqlite".to_string()
}

impl DetectorConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            request: RequestOptions::default(),
            archive: ArchiveConfig::default(),
            max_crawl_concurrency: None,
            database_url: default_database_url(),
        }
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_request_options(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    pub fn with_archive(mut self, archive: ArchiveConfig) -> Self {
        self.archive = archive;
        self
    }

    pub fn with_max_crawl_concurrency(mut self, limit: usize) -> Self {
        self.max_crawl_concurrency = Some(limit);
        self
    }

    /// Host of the origin, used to recognize absolute links to it.
    pub fn origin_host(&self) -> Option<&str> {
        self.origin.host_str()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        let origin = env::var("CHANGE_DETECTOR_ORIGIN")
            .map_err(|_| ConfigError::Missing("CHANGE_DETECTOR_ORIGIN"))?;
        let origin = Url::parse(&origin).map_err(|e| ConfigError::Invalid {
            key: "CHANGE_DETECTOR_ORIGIN",
            reason: e.to_string(),
        })?;

        let mut config = Self::new(origin);

        if let Some(ms) = env_millis("CHANGE_DETECTOR_POLLING_INTERVAL_MS")? {
            config.polling_interval = ms;
        }
        if let Some(ms) = env_millis("CHANGE_DETECTOR_SETTLE_DELAY_MS")? {
            config.settle_delay = ms;
        }
        config.request.timeout = env_millis("CHANGE_DETECTOR_REQUEST_TIMEOUT_MS")?;
        config.request.user_agent = env::var("CHANGE_DETECTOR_USER_AGENT").ok();

        if let Ok(dir) = env::var("CHANGE_DETECTOR_ARCHIVE_DIR") {
            config.archive = ArchiveConfig::enabled_at(dir);
        }
        if let Ok(limit) = env::var("CHANGE_DETECTOR_MAX_CONCURRENCY") {
            let limit = limit.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: "CHANGE_DETECTOR_MAX_CONCURRENCY",
                reason: e.to_string(),
            })?;
            config.max_crawl_concurrency = Some(limit);
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::File(Box::new(e)))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::File(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin.host_str().is_none() {
            return Err(ConfigError::Invalid {
                key: "origin",
                reason: "origin must have a host".to_string(),
            });
        }
        if self.polling_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "polling_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.archive.enabled && self.archive.base_path.is_none() {
            return Err(ConfigError::Invalid {
                key: "archive.base_path",
                reason: "required when archival is enabled".to_string(),
            });
        }
        if self.max_crawl_concurrency == Some(0) {
            return Err(ConfigError::Invalid {
                key: "max_crawl_concurrency",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn env_millis(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
