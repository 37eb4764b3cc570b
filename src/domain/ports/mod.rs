//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces the cache and the replay feeder consume:
//! - CacheLoader: the expensive computation behind a cache key
//! - TaskExecutor: the shared task pool loads and replays run on
//! - PipelineContext: wiring and row input of a running pipeline
//!
//! Adapters in `crate::adapters` provide in-process implementations.

pub mod executor;
pub mod loader;
pub mod pipeline;

pub use executor::{submit, TaskExecutor, TaskHandle};
pub use loader::{loader_fn, CacheLoader, FnLoader};
pub use pipeline::{
    ExecutionPoint, Listener, ListenerTag, PipelineContext, ProcessingStage, ProducerBranch,
    RowInput,
};
