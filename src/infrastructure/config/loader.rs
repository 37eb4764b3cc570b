use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid cache ttl_secs: {0}. Must be at least 1")]
    InvalidTtl(u64),

    #[error("Invalid cache refresh_ahead: {0}. Must be greater than 0 and at most 1")]
    InvalidRefreshAhead(f64),

    #[error("Invalid replay ready_timeout_secs: {0}. Must be at least 1")]
    InvalidReadyTimeout(u64),

    #[error("Invalid replay put_timeout_ms: {0}. Must be at least 1")]
    InvalidPutTimeout(u64),

    #[error("Invalid replay max_put_attempts: {0}. Must be at least 1 when set")]
    InvalidMaxPutAttempts(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .rowcache/config.yaml (project config)
    /// 3. .rowcache/local.yaml (project local overrides, optional)
    /// 4. Environment variables (ROWCACHE_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .merge(Yaml::file(".rowcache/config.yaml"))
            .merge(Yaml::file(".rowcache/local.yaml"))
            .merge(Env::prefixed("ROWCACHE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring environment overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Self::figment()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("ROWCACHE_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.cache.ttl_secs == 0 {
            return Err(ConfigError::InvalidTtl(config.cache.ttl_secs));
        }

        let refresh_ahead = config.cache.refresh_ahead;
        if !(refresh_ahead > 0.0 && refresh_ahead <= 1.0) {
            return Err(ConfigError::InvalidRefreshAhead(refresh_ahead));
        }

        if config.replay.ready_timeout_secs == 0 {
            return Err(ConfigError::InvalidReadyTimeout(
                config.replay.ready_timeout_secs,
            ));
        }

        if config.replay.put_timeout_ms == 0 {
            return Err(ConfigError::InvalidPutTimeout(config.replay.put_timeout_ms));
        }

        if let Some(0) = config.replay.max_put_attempts {
            return Err(ConfigError::InvalidMaxPutAttempts(0));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}
