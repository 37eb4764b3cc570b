use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure for rowcache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Refreshing cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cache replay configuration
    #[serde(default)]
    pub replay: ReplayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Refreshing cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// Absolute time-to-live of a cache entry, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Fraction of the TTL after which a still-valid entry is refreshed
    /// in the background (0 < x <= 1; 1 disables preemptive refresh)
    #[serde(default = "default_refresh_ahead")]
    pub refresh_ahead: f64,
}

const fn default_ttl_secs() -> u64 {
    300
}

const fn default_refresh_ahead() -> f64 {
    0.5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            refresh_ahead: default_refresh_ahead(),
        }
    }
}

impl CacheConfig {
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Cache replay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplayConfig {
    /// How long a replay waits for the pipeline to become ready for input
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Timeout of a single hand-off attempt, in milliseconds
    #[serde(default = "default_put_timeout_ms")]
    pub put_timeout_ms: u64,

    /// Maximum hand-off attempts per row; unset retries for as long as the
    /// pipeline keeps running
    #[serde(default)]
    pub max_put_attempts: Option<u32>,
}

const fn default_ready_timeout_secs() -> u64 {
    30
}

const fn default_put_timeout_ms() -> u64 {
    10_000
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout_secs(),
            put_timeout_ms: default_put_timeout_ms(),
            max_put_attempts: None,
        }
    }
}

impl ReplayConfig {
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub const fn put_timeout(&self) -> Duration {
        Duration::from_millis(self.put_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (if unset, logs only go to the console)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable console (stderr) logging
    #[serde(default = "default_true")]
    pub enable_console: bool,

    /// Log file rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_console: true,
            rotation: RotationPolicy::default(),
        }
    }
}
