//! Domain errors for the rowcache system.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error raised by a [`CacheLoader`](crate::domain::ports::CacheLoader).
///
/// Cheap to clone: the same failure is handed to every caller that was
/// waiting on the load, and it is stored in the cache entry afterwards.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadError {
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl LoadError {
    /// Create a load error with a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a load error wrapping an underlying cause.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for LoadError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Errors surfaced by [`RefreshingCache::get`](crate::services::RefreshingCache::get).
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Failed to load cache entry {key}: {source}")]
    Load {
        key: String,
        #[source]
        source: LoadError,
    },

    #[error("Load for cache entry {key} was abandoned before it produced a result")]
    LoadAbandoned { key: String },
}

impl CacheError {
    /// The underlying loader failure, if this error came from the loader.
    pub fn load_error(&self) -> Option<&LoadError> {
        match self {
            Self::Load { source, .. } => Some(source),
            Self::LoadAbandoned { .. } => None,
        }
    }
}

/// Errors surfaced on a replay's [`ReplayHandle`](crate::services::ReplayHandle).
///
/// Partial delivery is not an error; it shows up as
/// `ReplayOutcome::delivered < ReplayOutcome::total`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Cache replay did not start: pipeline was not ready for input within {waited:?}")]
    ReadinessTimeout { waited: Duration },

    #[error("Cache replay did not start: pipeline dropped its readiness listener without firing it")]
    ReadinessAbandoned,

    #[error("Cache replay task was dropped before it reported a row count")]
    TaskLost,
}

impl ReplayError {
    /// True when the downstream pipeline never became ready to consume.
    pub const fn is_readiness_failure(&self) -> bool {
        matches!(self, Self::ReadinessTimeout { .. } | Self::ReadinessAbandoned)
    }
}

/// Errors from a task submitted to a [`TaskExecutor`](crate::domain::ports::TaskExecutor).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Submitted task was dropped before producing a value")]
    TaskDropped,
}

pub type CacheResult<T> = Result<T, CacheError>;
pub type ReplayResult<T> = Result<T, ReplayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_load_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = LoadError::with_source("reading rows", io);
        assert_eq!(err.to_string(), "reading rows");
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("disk gone"));
    }

    #[test]
    fn test_cache_error_exposes_load_error() {
        let err = CacheError::Load {
            key: "orders".to_string(),
            source: LoadError::new("boom"),
        };
        assert_eq!(err.load_error().map(LoadError::message), Some("boom"));
        assert!(err.to_string().contains("orders"));

        let abandoned = CacheError::LoadAbandoned { key: "orders".to_string() };
        assert!(abandoned.load_error().is_none());
    }

    #[test]
    fn test_readiness_failures_are_distinguishable() {
        assert!(ReplayError::ReadinessTimeout { waited: Duration::from_secs(30) }
            .is_readiness_failure());
        assert!(ReplayError::ReadinessAbandoned.is_readiness_failure());
        assert!(!ReplayError::TaskLost.is_readiness_failure());
    }
}
