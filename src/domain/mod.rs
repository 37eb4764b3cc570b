//! Domain layer for rowcache
//!
//! This module contains the core models, ports, and error types.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{CacheError, ExecutorError, LoadError, ReplayError};
