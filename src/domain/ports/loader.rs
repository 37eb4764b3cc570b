use std::future::Future;

use async_trait::async_trait;

use crate::domain::errors::LoadError;

/// Port for the expensive computation behind a cache key.
///
/// Must be safe to call concurrently for different keys. The cache never
/// runs more than one load at a time for the same key.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use rowcache::domain::errors::LoadError;
/// use rowcache::domain::ports::CacheLoader;
///
/// struct Squares;
///
/// #[async_trait]
/// impl CacheLoader<u64, u64> for Squares {
///     async fn load(&self, key: &u64) -> Result<u64, LoadError> {
///         Ok(key * key)
///     }
/// }
/// ```
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
{
    async fn load(&self, key: &K) -> Result<V, LoadError>;
}

/// Adapts an async closure into a [`CacheLoader`].
pub struct FnLoader<F> {
    f: F,
}

impl<F> FnLoader<F> {
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut, K, V> CacheLoader<K, V> for FnLoader<F>
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    async fn load(&self, key: &K) -> Result<V, LoadError> {
        (self.f)(key.clone()).await
    }
}

/// Build a loader from an async closure.
pub const fn loader_fn<F>(f: F) -> FnLoader<F> {
    FnLoader::new(f)
}
