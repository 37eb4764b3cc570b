//! Cache entry and freshness classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::domain::errors::LoadError;

/// Result of one completed load, as stored by the cache.
///
/// Immutable once constructed. A successful load carries a value; a failed
/// load carries an error and, when a still-valid value existed before the
/// failed refresh, that previous value together with its original load time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: Option<V>,
    loaded_at: Instant,
    loaded_at_utc: DateTime<Utc>,
    error: Option<LoadError>,
}

impl<V> CacheEntry<V> {
    /// Entry for a successful load.
    pub fn loaded(value: V, loaded_at: Instant) -> Self {
        Self {
            value: Some(value),
            loaded_at,
            loaded_at_utc: Utc::now(),
            error: None,
        }
    }

    /// Error-only entry for a failed load with no valid value to keep.
    pub fn failed(error: LoadError, loaded_at: Instant) -> Self {
        Self {
            value: None,
            loaded_at,
            loaded_at_utc: Utc::now(),
            error: Some(error),
        }
    }

    /// Record a failed refresh on top of a still-valid entry.
    ///
    /// Keeps the previous value and load time so the value expires on its
    /// original schedule.
    pub fn failed_refresh(previous: &Self, error: LoadError) -> Self
    where
        V: Clone,
    {
        Self {
            value: previous.value.clone(),
            loaded_at: previous.loaded_at,
            loaded_at_utc: previous.loaded_at_utc,
            error: Some(error),
        }
    }

    /// The cached value, if any.
    pub const fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// The error of the load that produced this entry, if it failed.
    pub const fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    /// Monotonic time of the load the value came from.
    pub const fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// Wall-clock time of the load, for logs.
    pub const fn loaded_at_utc(&self) -> DateTime<Utc> {
        self.loaded_at_utc
    }

    /// Time elapsed since `loaded_at`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.loaded_at)
    }

    /// Classify this entry against `policy` at time `now`.
    pub fn freshness(&self, policy: &FreshnessPolicy, now: Instant) -> Freshness {
        policy.classify(self.age(now))
    }
}

/// How a cache entry relates to its time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Serve as-is.
    Fresh,
    /// Serve as-is, but start a background refresh.
    RefreshAhead,
    /// Must not be served; the caller waits for a new load.
    Expired,
}

impl Freshness {
    /// True when the entry must not be served and the caller waits for a load.
    pub const fn must_wait(self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// Absolute expiry plus the point after which a refresh starts preemptively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    ttl: Duration,
    refresh_after: Duration,
}

impl FreshnessPolicy {
    /// `refresh_ahead` is the fraction of `ttl` after which an entry is
    /// refreshed in the background. Values outside `(0, 1]` are clamped.
    pub fn new(ttl: Duration, refresh_ahead: f64) -> Self {
        let fraction = if refresh_ahead.is_finite() {
            refresh_ahead.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self {
            ttl,
            refresh_after: ttl.mul_f64(fraction),
        }
    }

    /// Age after which a still-valid entry is refreshed in the background.
    pub const fn refresh_after(&self) -> Duration {
        self.refresh_after
    }

    /// Boundaries are exclusive: an entry exactly `ttl` old is still valid.
    pub fn classify(&self, age: Duration) -> Freshness {
        if age > self.ttl {
            Freshness::Expired
        } else if age > self.refresh_after {
            Freshness::RefreshAhead
        } else {
            Freshness::Fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        let policy = FreshnessPolicy::new(Duration::from_secs(10), 0.5);
        assert_eq!(policy.refresh_after(), Duration::from_secs(5));

        assert_eq!(policy.classify(Duration::ZERO), Freshness::Fresh);
        assert_eq!(policy.classify(Duration::from_secs(5)), Freshness::Fresh);
        assert_eq!(policy.classify(Duration::from_millis(5001)), Freshness::RefreshAhead);
        assert_eq!(policy.classify(Duration::from_secs(10)), Freshness::RefreshAhead);
        assert_eq!(policy.classify(Duration::from_millis(10_001)), Freshness::Expired);
    }

    #[test]
    fn test_refresh_ahead_of_one_disables_preemptive_refresh() {
        let policy = FreshnessPolicy::new(Duration::from_secs(10), 1.0);
        assert_eq!(policy.classify(Duration::from_secs(10)), Freshness::Fresh);
        assert_eq!(policy.classify(Duration::from_millis(10_001)), Freshness::Expired);
    }

    #[test]
    fn test_out_of_range_fraction_is_clamped() {
        let policy = FreshnessPolicy::new(Duration::from_secs(10), 3.0);
        assert_eq!(policy.refresh_after(), Duration::from_secs(10));
        let policy = FreshnessPolicy::new(Duration::from_secs(10), f64::NAN);
        assert_eq!(policy.refresh_after(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_value_and_load_time() {
        let loaded = CacheEntry::loaded(42, Instant::now());
        tokio::time::advance(Duration::from_secs(3)).await;

        let failed = CacheEntry::failed_refresh(&loaded, LoadError::new("refresh failed"));
        assert_eq!(failed.value(), Some(&42));
        assert_eq!(failed.loaded_at(), loaded.loaded_at());
        assert_eq!(failed.error().map(LoadError::message), Some("refresh failed"));
        assert_eq!(failed.age(Instant::now()), Duration::from_secs(3));
    }
}
