//! Domain models for the rowcache system.

pub mod cache_entry;
pub mod config;
pub mod replay;
pub mod row;

pub use cache_entry::{CacheEntry, Freshness, FreshnessPolicy};
pub use config::{CacheConfig, Config, LogFormat, LoggingConfig, ReplayConfig, RotationPolicy};
pub use replay::ReplayOutcome;
pub use row::{Field, Row, RowSchema, RowSequence, Value, ValueKind};
