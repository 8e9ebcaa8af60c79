//! Worker configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::queue::DEFAULT_REQUEST_TIMEOUT;

/// Default queue service base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// Worker configuration
///
/// Immutable once handed to a [`Worker`](super::Worker). One worker serves
/// exactly one task type; the task type is passed to the worker itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Base URL of the queue service API
    pub base_url: String,

    /// Identity reported on poll and ack
    pub worker_id: String,

    /// Target time between the starts of consecutive poll cycles
    #[serde(with = "duration_millis")]
    pub polling_interval: Duration,

    /// Concurrency ceiling (tasks claimed but not yet resolved)
    pub max_concurrent_tasks: usize,

    /// Acknowledge each task before invoking the callback
    pub auto_ack: bool,

    /// How long `shutdown()` waits for in-flight tasks
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Per-request timeout for the HTTP queue service
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            worker_id: default_worker_id(),
            polling_interval: Duration::from_millis(1000),
            max_concurrent_tasks: 1,
            auto_ack: true,
            shutdown_timeout: Duration::from_secs(30),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set the concurrency ceiling; `validate()` rejects 0
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("base_url", "must not be empty"));
        }
        if self.worker_id.trim().is_empty() {
            return Err(ConfigError::invalid("worker_id", "must not be empty"));
        }
        if self.polling_interval.is_zero() {
            return Err(ConfigError::invalid("polling_interval", "must be greater than zero"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::invalid("max_concurrent_tasks", "must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be greater than zero"));
        }
        Ok(())
    }

    /// Create configuration from `CONDUCTOR_*` environment variables
    ///
    /// Unset variables keep their defaults; set but unparseable ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable lookup
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = get("CONDUCTOR_BASE_URL") {
            config.base_url = url;
        }
        if let Some(id) = get("CONDUCTOR_WORKER_ID") {
            config.worker_id = id;
        }
        if let Some(v) = get("CONDUCTOR_POLLING_INTERVAL_MS") {
            config.polling_interval = parse_millis("CONDUCTOR_POLLING_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("CONDUCTOR_MAX_CONCURRENT_TASKS") {
            let max: usize = v.parse().map_err(|_| {
                ConfigError::invalid("CONDUCTOR_MAX_CONCURRENT_TASKS", format!("not a count: {v}"))
            })?;
            config.max_concurrent_tasks = max;
        }
        if let Some(v) = get("CONDUCTOR_AUTO_ACK") {
            config.auto_ack = parse_bool("CONDUCTOR_AUTO_ACK", &v)?;
        }
        if let Some(v) = get("CONDUCTOR_SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout = parse_millis("CONDUCTOR_SHUTDOWN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("CONDUCTOR_REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("CONDUCTOR_REQUEST_TIMEOUT_MS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Host name, or `worker-<uuid>` when it cannot be read
fn default_worker_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("worker-{}", Uuid::now_v7()))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::invalid(key, format!("not a number of milliseconds: {value}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("not a boolean: {value}"))),
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
