//! Configuration management for the recast worker
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `RECAST_*` environment variables. The result is validated before
//! anything connects to the store.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub worker: WorkerConfig,
    pub schedule: ScheduleConfig,
    pub pipeline: PipelineConfig,
    pub api: ApiConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

/// Coordination store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Optional namespace prepended to every key
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            key_prefix: String::new(),
        }
    }
}

/// Retry bounds for store calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per ordinary store call
    pub max_attempts: u32,
    /// Linear backoff step between ordinary attempts
    pub linear_step_ms: u64,
    /// Attempts per blocking pop before the loop escalates
    pub pop_max_attempts: u32,
    /// First delay of the exponential pop backoff
    pub pop_base_delay_ms: u64,
    pub pop_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            linear_step_ms: 2_000,
            pop_max_attempts: 3,
            pop_base_delay_ms: 5_000,
            pop_max_delay_ms: 60_000,
        }
    }
}

/// Consumer, heartbeat, control and supervisor timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Blocking pop timeout for discovery and generation
    pub poll_timeout_secs: u64,
    /// Blocking pop timeout for publish (also the promotion interval)
    pub publish_poll_timeout_secs: u64,
    /// Sleep between pause checks while paused
    pub pause_poll_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_ttl_secs: u64,
    pub control_poll_secs: u64,
    /// Expiry of a written control signal
    pub control_ttl_secs: u64,
    pub restart_cooldown_secs: u64,
    /// Loop restarts before the worker gives up
    pub max_restarts: u32,
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            publish_poll_timeout_secs: 10,
            pause_poll_secs: 10,
            heartbeat_interval_secs: 60,
            heartbeat_ttl_secs: 300,
            control_poll_secs: 5,
            control_ttl_secs: 300,
            restart_cooldown_secs: 30,
            max_restarts: 5,
            shutdown_grace_secs: 15,
        }
    }
}

/// Recurring jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub discovery_sweep_minutes: u64,
    pub cleanup_minutes: u64,
    pub stats_minutes: u64,
    /// Delay before the first all-users sweep; 0 disables it
    pub initial_run_delay_secs: u64,
    pub queue_trim_threshold: usize,
    pub queue_trim_keep: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            discovery_sweep_minutes: 30,
            cleanup_minutes: 60,
            stats_minutes: 15,
            initial_run_delay_secs: 5,
            queue_trim_threshold: 1000,
            queue_trim_keep: 500,
        }
    }
}

/// Stage behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dedup_ttl_days: u64,
    pub quota_ttl_hours: u64,
    /// Outstanding posts re-enqueued per priority resolution
    pub pending_drain_limit: usize,
    pub settings_cache_secs: u64,
    pub activity_log_len: usize,
    /// Re-index over-quota publishes for the next day instead of dropping them
    pub defer_over_quota: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_days: 30,
            quota_ttl_hours: 25,
            pending_drain_limit: 50,
            settings_cache_secs: 600,
            activity_log_len: 100,
            defer_over_quota: true,
        }
    }
}

/// REST endpoint of the system of record and collaborator services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/".to_string(),
            token: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Control surface HTTP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub bind_address: String,
    pub enable_cors: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            enable_cors: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

macro_rules! override_from_env {
    ($target:expr, $name:literal) => {
        if let Some(value) = env_parse($name) {
            $target = value;
        }
    };
}

impl Config {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// File (when given) plus environment, validated
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `RECAST_*` overrides on top of the current values
    pub fn apply_env(&mut self) {
        if let Some(url) = env_string("RECAST_STORE_URL").or_else(|| env_string("REDIS_URL")) {
            self.store.url = url;
        }
        override_from_env!(self.store.pool_size, "RECAST_STORE_POOL_SIZE");
        if let Some(prefix) = env_string("RECAST_KEY_PREFIX") {
            self.store.key_prefix = prefix;
        }

        override_from_env!(self.retry.max_attempts, "RECAST_RETRY_MAX_ATTEMPTS");
        override_from_env!(self.retry.pop_max_attempts, "RECAST_POP_MAX_ATTEMPTS");

        override_from_env!(self.worker.poll_timeout_secs, "RECAST_POLL_TIMEOUT_SECS");
        override_from_env!(
            self.worker.publish_poll_timeout_secs,
            "RECAST_PUBLISH_POLL_TIMEOUT_SECS"
        );
        override_from_env!(
            self.worker.heartbeat_interval_secs,
            "RECAST_HEARTBEAT_INTERVAL_SECS"
        );
        override_from_env!(self.worker.max_restarts, "RECAST_MAX_RESTARTS");
        override_from_env!(
            self.worker.restart_cooldown_secs,
            "RECAST_RESTART_COOLDOWN_SECS"
        );

        override_from_env!(
            self.schedule.discovery_sweep_minutes,
            "RECAST_DISCOVERY_SWEEP_MINUTES"
        );
        override_from_env!(
            self.schedule.initial_run_delay_secs,
            "RECAST_INITIAL_RUN_DELAY_SECS"
        );

        override_from_env!(self.pipeline.defer_over_quota, "RECAST_DEFER_OVER_QUOTA");
        override_from_env!(
            self.pipeline.pending_drain_limit,
            "RECAST_PENDING_DRAIN_LIMIT"
        );

        if let Some(url) = env_string("RECAST_API_URL") {
            self.api.base_url = url;
        }
        if let Some(token) = env_string("RECAST_API_TOKEN") {
            self.api.token = Some(token);
        }
        override_from_env!(self.api.timeout_secs, "RECAST_API_TIMEOUT_SECS");

        if let Some(addr) = env_string("RECAST_BIND_ADDRESS") {
            self.control.bind_address = addr;
        }
        if let Some(level) = env_string("RECAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_string("RECAST_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.store.url.trim().is_empty() {
            return invalid("store.url must not be empty");
        }
        if self.store.pool_size == 0 {
            return invalid("store.pool_size must be greater than 0");
        }
        if self.retry.max_attempts == 0 || self.retry.pop_max_attempts == 0 {
            return invalid("retry attempts must be greater than 0");
        }
        if self.worker.poll_timeout_secs == 0 || self.worker.publish_poll_timeout_secs == 0 {
            return invalid("poll timeouts must be greater than 0");
        }
        if self.worker.heartbeat_ttl_secs <= self.worker.heartbeat_interval_secs {
            return invalid("worker.heartbeat_ttl_secs must exceed the heartbeat interval");
        }
        if self.schedule.discovery_sweep_minutes == 0 || self.schedule.cleanup_minutes == 0 {
            return invalid("schedule intervals must be greater than 0");
        }
        if self.schedule.queue_trim_keep >= self.schedule.queue_trim_threshold {
            return invalid("schedule.queue_trim_keep must be below queue_trim_threshold");
        }
        if url::Url::parse(&self.api.base_url).is_err() {
            return invalid("api.base_url is not a valid URL");
        }
        if self.control.bind_address.parse::<SocketAddr>().is_err() {
            return invalid("control.bind_address is not a socket address");
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return invalid("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Get API request timeout as Duration
    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    #[must_use]
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.pipeline.dedup_ttl_days * 24 * 60 * 60)
    }

    #[must_use]
    pub fn quota_ttl(&self) -> Duration {
        Duration::from_secs(self.pipeline.quota_ttl_hours * 60 * 60)
    }
}
