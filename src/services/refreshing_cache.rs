//! Self-refreshing, single-flight cache.
//!
//! Values are produced by a [`CacheLoader`] and kept for a fixed time-to-live.
//! Once an entry is older than the refresh-ahead point it is still served,
//! but a background reload is started on the shared [`TaskExecutor`]. Once
//! it is older than the TTL, callers wait for a fresh load.
//!
//! Concurrent loads of the same key are deduplicated: every caller that needs
//! a load for a key awaits the same [`Shared`] future. The entry map and the
//! pending-load map live behind one mutex that is only held to classify,
//! register a pending load, or install a finished one. The loader itself and
//! the wait for its result run outside the lock.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{CacheError, CacheResult, LoadError};
use crate::domain::models::{CacheConfig, CacheEntry, Freshness, FreshnessPolicy};
use crate::domain::ports::{CacheLoader, TaskExecutor};

/// Resolves to the installed entry, or `None` if the loader panicked.
type SharedLoad<V> = Shared<BoxFuture<'static, Option<Arc<CacheEntry<V>>>>>;

/// Handle to the single in-flight load of one key.
///
/// An invalidated load keeps its slot until it finishes, so a later load of
/// the same key is chained behind it rather than run alongside it.
struct PendingLoad<V> {
    generation: u64,
    invalidated: bool,
    future: SharedLoad<V>,
}

struct CacheState<K, V> {
    entries: HashMap<K, Arc<CacheEntry<V>>>,
    pending: HashMap<K, PendingLoad<V>>,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    stale_hits: u64,
    misses: u64,
    loads_started: u64,
    load_failures: u64,
}

/// Point-in-time snapshot of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Keys currently holding an entry
    pub entries: usize,
    /// Loads currently in flight
    pub pending_loads: usize,
    /// Calls served from a fresh entry
    pub hits: u64,
    /// Calls served from an entry that triggered a background refresh
    pub stale_hits: u64,
    /// Calls that had to wait for a load
    pub misses: u64,
    /// Loader invocations started
    pub loads_started: u64,
    /// Loader invocations that returned an error
    pub load_failures: u64,
}

/// What a `get` call decided while holding the lock.
enum Decision<V> {
    Serve(Arc<CacheEntry<V>>),
    Wait(SharedLoad<V>),
}

struct CacheInner<K, V> {
    state: Mutex<CacheState<K, V>>,
    loader: Arc<dyn CacheLoader<K, V>>,
    executor: Arc<dyn TaskExecutor>,
    policy: FreshnessPolicy,
    next_generation: AtomicU64,
}

/// Self-refreshing single-flight cache.
///
/// Cloning yields another handle to the same cache.
pub struct RefreshingCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for RefreshingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> RefreshingCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache configured from `config`.
    pub fn new<L>(loader: L, executor: Arc<dyn TaskExecutor>, config: &CacheConfig) -> Self
    where
        L: CacheLoader<K, V>,
    {
        Self::with_policy(
            loader,
            executor,
            FreshnessPolicy::new(config.ttl(), config.refresh_ahead),
        )
    }

    /// Create a cache with an explicit freshness policy.
    pub fn with_policy<L>(loader: L, executor: Arc<dyn TaskExecutor>, policy: FreshnessPolicy) -> Self
    where
        L: CacheLoader<K, V>,
    {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    pending: HashMap::new(),
                    counters: Counters::default(),
                }),
                loader: Arc::new(loader),
                executor,
                policy,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Get the value for `key`.
    ///
    /// Returns immediately when a valid entry exists (starting a background
    /// refresh if the entry is past its refresh-ahead point). Otherwise waits
    /// for a load, joining one already in flight if there is one.
    ///
    /// A valid value keeps being served after a failed background refresh
    /// until it expires. An entry that only carries an error is reported as
    /// [`CacheError::Load`] until it is itself replaced.
    pub async fn get(&self, key: &K) -> CacheResult<V> {
        let decision = self.decide(key);

        let entry = match decision {
            Decision::Serve(entry) => entry,
            Decision::Wait(load) => match load.await {
                Some(entry) => entry,
                None => {
                    return Err(CacheError::LoadAbandoned {
                        key: format!("{key:?}"),
                    })
                }
            },
        };

        entry_result(key, &entry)
    }

    /// Current entry for `key`, without loading or refreshing.
    pub fn peek(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        self.inner.lock_state().entries.get(key).cloned()
    }

    /// Whether a load for `key` is currently in flight.
    pub fn is_loading(&self, key: &K) -> bool {
        self.inner.lock_state().pending.contains_key(key)
    }

    /// Drop the entry for `key`.
    ///
    /// A load already in flight still resolves for the callers waiting on it,
    /// but its result is not installed. The next `get` starts a fresh load
    /// once that one has finished.
    pub fn invalidate(&self, key: &K) {
        let mut state = self.inner.lock_state();
        let had_entry = state.entries.remove(key).is_some();
        let had_pending = match state.pending.get_mut(key) {
            Some(pending) => {
                pending.invalidated = true;
                true
            }
            None => false,
        };
        debug!(key = ?key, had_entry, had_pending, "cache entry invalidated");
    }

    /// Drop every entry, invalidating loads in flight as [`invalidate`](Self::invalidate) does.
    pub fn invalidate_all(&self) {
        let mut state = self.inner.lock_state();
        state.entries.clear();
        for pending in state.pending.values_mut() {
            pending.invalidated = true;
        }
        debug!("cache cleared");
    }

    /// Snapshot of entry counts and activity counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock_state();
        CacheStats {
            entries: state.entries.len(),
            pending_loads: state.pending.len(),
            hits: state.counters.hits,
            stale_hits: state.counters.stale_hits,
            misses: state.counters.misses,
            loads_started: state.counters.loads_started,
            load_failures: state.counters.load_failures,
        }
    }

    /// Classify the entry for `key` and register a load if one is needed.
    ///
    /// This is the only place a pending load is created, and it runs under
    /// the state lock. The load task is handed to the executor after the
    /// lock is released.
    fn decide(&self, key: &K) -> Decision<V> {
        let now = Instant::now();
        let mut started = None;

        let decision = {
            let mut state = self.inner.lock_state();
            let current = state.entries.get(key).cloned();
            let freshness = current
                .as_ref()
                .map_or(Freshness::Expired, |entry| entry.freshness(&self.inner.policy, now));

            match (freshness, current) {
                (Freshness::Fresh, Some(entry)) => {
                    state.counters.hits += 1;
                    debug!(key = ?key, "cache hit");
                    Decision::Serve(entry)
                }
                (Freshness::RefreshAhead, Some(entry)) => {
                    self.join_or_start(&mut state, key, &mut started);
                    state.counters.stale_hits += 1;
                    debug!(key = ?key, "cache hit past refresh point, refreshing in background");
                    Decision::Serve(entry)
                }
                _ => {
                    let load = self.join_or_start(&mut state, key, &mut started);
                    state.counters.misses += 1;
                    debug!(key = ?key, "cache miss, waiting for load");
                    Decision::Wait(load)
                }
            }
        };

        if let Some(load) = started {
            self.inner.executor.spawn(load.map(|_| ()).boxed());
        }

        decision
    }

    /// Return the pending load for `key`, registering a new one if none is in
    /// flight. A newly registered load is also written to `started`.
    ///
    /// A pending load that was invalidated is not joined: the new load is
    /// registered in its place and only calls the loader once it has finished.
    fn join_or_start(
        &self,
        state: &mut CacheState<K, V>,
        key: &K,
        started: &mut Option<SharedLoad<V>>,
    ) -> SharedLoad<V> {
        let predecessor = match state.pending.get(key) {
            Some(pending) if !pending.invalidated => return pending.future.clone(),
            Some(pending) => Some(pending.future.clone()),
            None => None,
        };
        let load = self.start_load(state, key, predecessor);
        *started = Some(load.clone());
        load
    }

    fn start_load(
        &self,
        state: &mut CacheState<K, V>,
        key: &K,
        predecessor: Option<SharedLoad<V>>,
    ) -> SharedLoad<V> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let load_key = key.clone();

        let future = async move {
            if let Some(previous) = predecessor {
                previous.await;
            }
            let result = AssertUnwindSafe(inner.loader.load(&load_key))
                .catch_unwind()
                .await;
            inner.complete_load(&load_key, generation, result.ok())
        }
        .boxed()
        .shared();

        state.counters.loads_started += 1;
        state.pending.insert(
            key.clone(),
            PendingLoad {
                generation,
                invalidated: false,
                future: future.clone(),
            },
        );
        future
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the outcome of a load and clear its pending slot.
    ///
    /// `result` is `None` when the loader panicked. A load that was
    /// invalidated or superseded in the meantime hands its entry to its own
    /// waiters but leaves the entry map untouched.
    #[instrument(level = "debug", skip(self, key, result), fields(key = ?key))]
    fn complete_load(
        &self,
        key: &K,
        generation: u64,
        result: Option<Result<V, LoadError>>,
    ) -> Option<Arc<CacheEntry<V>>> {
        let now = Instant::now();
        let mut state = self.lock_state();

        let (owns_slot, invalidated) = match state.pending.get(key) {
            Some(pending) if pending.generation == generation => (true, pending.invalidated),
            _ => (false, false),
        };
        if owns_slot {
            state.pending.remove(key);
        }
        let current = owns_slot && !invalidated;

        let entry = match result {
            None => {
                warn!("cache loader panicked, load abandoned");
                return None;
            }
            Some(Ok(value)) => {
                let entry = CacheEntry::loaded(value, now);
                info!(loaded_at = %entry.loaded_at_utc(), "cache entry loaded");
                Arc::new(entry)
            }
            Some(Err(error)) => {
                state.counters.load_failures += 1;
                warn!(error = %error, "cache load failed");
                match state.entries.get(key) {
                    Some(previous)
                        if previous.value().is_some()
                            && !previous.freshness(&self.policy, now).must_wait() =>
                    {
                        Arc::new(CacheEntry::failed_refresh(previous, error))
                    }
                    _ => Arc::new(CacheEntry::failed(error, now)),
                }
            }
        };

        if current {
            state.entries.insert(key.clone(), Arc::clone(&entry));
        } else {
            debug!("load finished after invalidation, result not installed");
        }
        Some(entry)
    }
}

fn entry_result<K: Debug, V: Clone>(key: &K, entry: &CacheEntry<V>) -> CacheResult<V> {
    if let Some(value) = entry.value() {
        return Ok(value.clone());
    }
    let source = entry
        .error()
        .cloned()
        .unwrap_or_else(|| LoadError::new("cache entry holds neither a value nor an error"));
    Err(CacheError::Load {
        key: format!("{key:?}"),
        source,
    })
}
