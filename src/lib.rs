//! Rowcache - cached row sets replayed into running pipelines
//!
//! Rowcache keeps the result of an expensive, loader-supplied computation in a
//! self-refreshing, single-flight cache, and replays a cached row sequence
//! into a live pipeline so the downstream consumer sees the same rows a fresh
//! execution would have produced.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, error types, and port traits
//! - **Service Layer** (`services`): The refreshing cache and the replay feeder
//! - **Adapters** (`adapters`): Tokio executor and an in-process pipeline
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rowcache::{
//!     loader_fn, CacheConfig, LoadError, RefreshingCache, TokioExecutor,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let loader = loader_fn(|n: u64| async move { Ok::<_, LoadError>(n * n) });
//!     let cache = RefreshingCache::new(
//!         loader,
//!         Arc::new(TokioExecutor::current()),
//!         &CacheConfig::default(),
//!     );
//!     assert_eq!(cache.get(&12).await?, 144);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::{LocalBranch, LocalPipeline, TokioExecutor};
pub use domain::errors::{CacheError, ExecutorError, LoadError, ReplayError};
pub use domain::models::{
    CacheConfig, CacheEntry, Config, Freshness, FreshnessPolicy, LoggingConfig, ReplayConfig,
    ReplayOutcome, Row, RowSchema, RowSequence, Value,
};
pub use domain::ports::{
    loader_fn, CacheLoader, ExecutionPoint, ListenerTag, PipelineContext, ProducerBranch,
    RowInput, TaskExecutor,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CacheReplayFeeder, CacheStats, CachedReplayService, RefreshingCache, ReplayHandle};
