//! Serves repeated executions of the same computation from cached rows.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::errors::CacheResult;
use crate::domain::models::{CacheConfig, ReplayConfig, RowSequence};
use crate::domain::ports::{CacheLoader, PipelineContext, TaskExecutor};
use crate::services::refreshing_cache::RefreshingCache;
use crate::services::replay_feeder::{CacheReplayFeeder, ReplayHandle};

/// Caches row sequences by key and replays them into pipelines.
pub struct CachedReplayService<K> {
    cache: RefreshingCache<K, RowSequence>,
    feeder: CacheReplayFeeder,
}

impl<K> CachedReplayService<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Build the cache and the feeder on one shared executor.
    pub fn new<L>(
        loader: L,
        executor: Arc<dyn TaskExecutor>,
        cache_config: &CacheConfig,
        replay_config: ReplayConfig,
    ) -> Self
    where
        L: CacheLoader<K, RowSequence>,
    {
        Self {
            cache: RefreshingCache::new(loader, Arc::clone(&executor), cache_config),
            feeder: CacheReplayFeeder::new(executor, replay_config),
        }
    }

    /// The underlying cache, for stats and invalidation.
    pub const fn cache(&self) -> &RefreshingCache<K, RowSequence> {
        &self.cache
    }

    /// Fetch the rows cached for `key` (loading them if needed) and arm
    /// `ctx` to replay them.
    ///
    /// A load failure is returned before the pipeline is touched, so the
    /// caller can fall back to running it normally.
    #[instrument(skip(self, key, ctx), fields(key = ?key))]
    pub async fn replay_cached(&self, key: &K, ctx: &dyn PipelineContext) -> CacheResult<ReplayHandle> {
        let rows = self.cache.get(key).await?;
        debug!(rows = rows.len(), "replaying cached rows");
        Ok(self.feeder.replay(ctx, rows))
    }
}
