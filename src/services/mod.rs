//! Service layer: the refreshing cache, the replay feeder, and their composition.

pub mod cached_replay_service;
pub mod refreshing_cache;
pub mod replay_feeder;

pub use cached_replay_service::CachedReplayService;
pub use refreshing_cache::{CacheStats, RefreshingCache};
pub use replay_feeder::{CacheReplayFeeder, ReplayHandle};
