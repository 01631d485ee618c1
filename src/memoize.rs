//! Memoizer Module
//!
//! Wraps a computation with a cache built from [`MemoizeOptions`].
//!
//! [`memoize`] handles computations that return a value right away,
//! [`memoize_async`] handles computations that return a future. Both
//! dereference to a [`MemoCache`], the introspection surface shared by the
//! two flavours.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, error};

use crate::cache::{CacheEvent, CacheSnapshot, CacheStore, EventKind, ListenerId, Reason};
use crate::config::MemoizeOptions;
use crate::error::{CacheError, Result};
use crate::key::{Key, KeyPipeline, Value};
use crate::stats::{StatsManager, StatsReport};
use crate::tasks::{pending, ArmOn, ExpirationInfo, ExpirationManager, Pending, PendingResolver};

/// A synchronous computation over dynamic arguments.
pub type ComputeFn<V, E> = dyn Fn(&[Value]) -> std::result::Result<V, E> + Send + Sync;
/// An asynchronous computation over dynamic arguments.
pub type AsyncComputeFn<T, E> =
    dyn Fn(&[Value]) -> BoxFuture<'static, std::result::Result<T, E>> + Send + Sync;
/// Options for an async memoizer; the cached value is the pending result.
pub type AsyncOptions<T, E> = MemoizeOptions<Pending<T, E>>;

// == Memo Cache ==
/// The cache behind one memoized computation.
///
/// Every method taking `args` runs them through the same key pipeline as a
/// call, so `has(&[Value::Int(2)])` answers whether calling with `2` would
/// hit.
pub struct MemoCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    store: CacheStore<V>,
    pipeline: KeyPipeline,
    options: MemoizeOptions<V>,
    expiration: Option<ExpirationManager<V>>,
    stats: Option<StatsManager<V>>,
}

impl<V> MemoCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn build(options: MemoizeOptions<V>, arm_on: ArmOn) -> Result<Self> {
        let store = CacheStore::new(options.capacity, options.key_matcher());
        let pipeline = options.key_pipeline();

        let expiration = match &options.expires {
            Some(expires) => Some(ExpirationManager::attach(&store, expires.clone(), arm_on)?),
            None => None,
        };
        let stats = options.stats.as_ref().map(|stats| {
            let name = stats
                .name
                .clone()
                .unwrap_or_else(|| stats.registry.anonymous_name());
            StatsManager::attach(&store, Arc::clone(&stats.registry), name)
        });

        debug!(
            capacity = ?options.capacity,
            equality = ?options.equality,
            expires = options.expires.is_some(),
            "memoized computation ready"
        );

        Ok(Self {
            store,
            pipeline,
            options,
            expiration,
            stats,
        })
    }

    /// The key a call with `args` would use.
    pub fn key(&self, args: &[Value]) -> Key {
        self.pipeline.transform(args)
    }

    /// Read-through lookup that never computes: a match becomes most
    /// recently used and counts as a hit.
    pub fn get(&self, args: &[Value]) -> Result<Option<V>> {
        self.store.get(&self.key(args))
    }

    /// Side-effect free lookup.
    pub fn peek(&self, args: &[Value]) -> Option<V> {
        self.store.peek(&self.key(args))
    }

    pub fn has(&self, args: &[Value]) -> bool {
        self.store.has(&self.key(args))
    }

    /// Stores `value` as the result for `args`.
    pub fn set(&self, args: &[Value], value: V) -> Result<()> {
        self.insert(self.key(args), value, Reason::Explicit)
    }

    pub fn delete(&self, args: &[Value]) -> Result<bool> {
        self.store.delete(&self.key(args))
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Keys, most recently used first.
    pub fn keys(&self) -> Vec<Key> {
        self.store.snapshot().keys()
    }

    pub fn values(&self) -> Vec<V> {
        self.store.snapshot().values()
    }

    pub fn snapshot(&self) -> CacheSnapshot<V> {
        self.store.snapshot()
    }

    /// Pending expiration timers; empty when expiration is not configured.
    pub fn expirations(&self) -> Vec<ExpirationInfo> {
        self.expiration
            .as_ref()
            .map(ExpirationManager::expirations)
            .unwrap_or_default()
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent<V>) -> Result<()> + Send + Sync + 'static,
    {
        self.store.on(kind, listener)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.store.off(kind, id)
    }

    /// This computation's profile, or None when stats are not configured.
    pub fn stats(&self) -> Option<StatsReport> {
        self.stats.as_ref().map(StatsManager::stats)
    }

    pub fn profile_name(&self) -> Option<&str> {
        self.stats.as_ref().map(StatsManager::name)
    }

    pub fn options(&self) -> &MemoizeOptions<V> {
        &self.options
    }

    pub fn store(&self) -> &CacheStore<V> {
        &self.store
    }

    fn is_forced(&self, args: &[Value]) -> bool {
        self.options
            .force_update
            .as_ref()
            .is_some_and(|force| force(args))
    }

    /// Looks up `key` along the call path, unless the call is forced.
    fn lookup(&self, key: &Key, forced: bool) -> Result<Option<V>> {
        if forced {
            return Ok(None);
        }
        self.store.get(key)
    }

    /// Stores a computed value; if a listener rejects it (for example an
    /// invalid computed expiration) the entry is removed again with reason
    /// `rolled back`, so no value is left cached without its timer.
    fn insert(&self, key: Key, value: V, reason: Reason) -> Result<()> {
        let Err(err) = self.store.set_with_reason(key.clone(), value, reason) else {
            return Ok(());
        };

        if let Some(entry) = self.store.peek_entry(&key) {
            if let Err(rollback) =
                self.store
                    .remove_if_current(&key, entry.id, Some(entry.revision), Reason::RolledBack)
            {
                error!(key = %key, error = %rollback, "failed to roll back entry");
            }
        }
        Err(err)
    }
}

impl<V> Drop for MemoCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(expiration) = self.expiration.take() {
            expiration.detach();
        }
    }
}

impl<V> fmt::Debug for MemoCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("store", &self.store)
            .field("options", &self.options)
            .finish()
    }
}

// == Memoized ==
/// A memoized synchronous computation.
pub struct Memoized<V, E = anyhow::Error>
where
    V: Clone + Send + Sync + 'static,
{
    func: Arc<ComputeFn<V, E>>,
    cache: MemoCache<V>,
}

/// Wraps `func` with a cache configured by `options`.
///
/// Fails when the options need a tokio runtime (expiration) and none is
/// running.
///
/// # Example
/// ```
/// use memo_cache::{memoize, MemoizeOptions, Value};
///
/// let double = memoize(
///     |args: &[Value]| match args.first() {
///         Some(Value::Int(n)) => Ok(n * 2),
///         _ => Err(anyhow::anyhow!("expected an integer")),
///     },
///     MemoizeOptions::default(),
/// )
/// .unwrap();
///
/// assert_eq!(double.call(&[Value::Int(21)]).unwrap(), 42);
/// assert!(double.has(&[Value::Int(21)]));
/// ```
pub fn memoize<V, E, F>(func: F, options: MemoizeOptions<V>) -> Result<Memoized<V, E>>
where
    F: Fn(&[Value]) -> std::result::Result<V, E> + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Ok(Memoized {
        func: Arc::new(func),
        cache: MemoCache::build(options, ArmOn::Add)?,
    })
}

impl<V, E> Memoized<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: From<CacheError>,
{
    /// Returns the cached result for `args`, computing and storing it on a
    /// miss. Computation errors are returned unchanged and nothing is
    /// cached.
    pub fn call(&self, args: &[Value]) -> std::result::Result<V, E> {
        let key = self.cache.key(args);
        let forced = self.cache.is_forced(args);

        if let Some(value) = self.cache.lookup(&key, forced)? {
            return Ok(value);
        }

        let value = (self.func)(args)?;
        let reason = if forced { Reason::Forced } else { Reason::Explicit };
        self.cache.insert(key, value.clone(), reason)?;
        Ok(value)
    }
}

impl<V, E> Deref for Memoized<V, E>
where
    V: Clone + Send + Sync + 'static,
{
    type Target = MemoCache<V>;

    fn deref(&self) -> &MemoCache<V> {
        &self.cache
    }
}

impl<V, E> fmt::Debug for Memoized<V, E>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Memoized").field(&self.cache).finish()
    }
}

// == Async Memoized ==
/// A memoized asynchronous computation.
///
/// The cache holds the pending result, so concurrent callers with matching
/// arguments share one computation. A failed result is removed from the
/// cache once it settles; expiration starts counting when the result
/// resolves.
pub struct AsyncMemoized<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    func: Arc<AsyncComputeFn<T, E>>,
    cache: MemoCache<Pending<T, E>>,
    _resolver: PendingResolver<T, E>,
}

/// Wraps a future-returning `func` with a cache configured by `options`.
///
/// Must be called from within a tokio runtime.
pub fn memoize_async<T, E, F, Fut>(func: F, options: AsyncOptions<T, E>) -> Result<AsyncMemoized<T, E>>
where
    F: Fn(&[Value]) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let cache = MemoCache::build(options, ArmOn::Resolve)?;
    let resolver = PendingResolver::attach(cache.store())?;
    let func: Arc<AsyncComputeFn<T, E>> = Arc::new(move |args: &[Value]| func(args).boxed());

    Ok(AsyncMemoized {
        func,
        cache,
        _resolver: resolver,
    })
}

impl<T, E> AsyncMemoized<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<CacheError> + 'static,
{
    /// Awaits the cached or freshly started result for `args`.
    pub async fn call(&self, args: &[Value]) -> std::result::Result<T, E> {
        let result = self.call_pending(args)?;
        result.await
    }

    /// Returns the shared pending result without awaiting it.
    pub fn call_pending(&self, args: &[Value]) -> std::result::Result<Pending<T, E>, E> {
        let key = self.cache.key(args);
        let forced = self.cache.is_forced(args);

        if let Some(existing) = self.cache.lookup(&key, forced)? {
            return Ok(existing);
        }

        let result = pending((self.func)(args));
        let reason = if forced { Reason::Forced } else { Reason::Explicit };
        self.cache.insert(key, result.clone(), reason)?;
        Ok(result)
    }
}

impl<T, E> Deref for AsyncMemoized<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Target = MemoCache<Pending<T, E>>;

    fn deref(&self) -> &MemoCache<Pending<T, E>> {
        &self.cache
    }
}

impl<T, E> fmt::Debug for AsyncMemoized<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncMemoized").field(&self.cache).finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsRegistry;
    use crate::tasks::resolved;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_square(
        calls: &Arc<AtomicUsize>,
    ) -> impl Fn(&[Value]) -> anyhow::Result<i64> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move |args: &[Value]| {
            calls.fetch_add(1, Ordering::SeqCst);
            match args.first() {
                Some(Value::Int(n)) => Ok(n * n),
                _ => Err(anyhow::anyhow!("expected an integer")),
            }
        }
    }

    #[test]
    fn test_call_caches_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let square = memoize(counted_square(&calls), MemoizeOptions::default()).unwrap();

        assert_eq!(square.call(&[Value::Int(3)]).unwrap(), 9);
        assert_eq!(square.call(&[Value::Int(3)]).unwrap(), 9);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(square.len(), 1);
    }

    #[test]
    fn test_errors_pass_through_and_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let square = memoize(counted_square(&calls), MemoizeOptions::default()).unwrap();

        let err = square.call(&[Value::str("x")]).unwrap_err();
        assert_eq!(err.to_string(), "expected an integer");
        assert!(square.is_empty());
    }

    #[test]
    fn test_force_update_bypasses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let options = MemoizeOptions::builder()
            .force_update(|args| matches!(args.first(), Some(Value::Int(n)) if *n < 0))
            .build()
            .unwrap();
        let square = memoize(counted_square(&calls), options).unwrap();
        let reasons = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&reasons);
        square.on(EventKind::Update, move |event| {
            log.lock().push(event.reason);
            Ok(())
        });

        square.call(&[Value::Int(-2)]).unwrap();
        square.call(&[Value::Int(-2)]).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*reasons.lock(), vec![Some(Reason::Forced)]);
    }

    #[test]
    fn test_introspection_uses_key_pipeline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let options = MemoizeOptions::builder().max_args(1).build().unwrap();
        let square = memoize(counted_square(&calls), options).unwrap();

        square.call(&[Value::Int(4), Value::str("ignored")]).unwrap();

        assert!(square.has(&[Value::Int(4)]));
        assert!(square.has(&[Value::Int(4), Value::str("other")]));
        assert_eq!(square.peek(&[Value::Int(4)]), Some(16));
        assert_eq!(square.key(&[Value::Int(4), Value::Null]).len(), 1);

        square.set(&[Value::Int(5)], 0).unwrap();
        assert_eq!(square.call(&[Value::Int(5)]).unwrap(), 0);

        assert!(square.delete(&[Value::Int(5)]).unwrap());
        assert!(!square.has(&[Value::Int(5)]));
    }

    #[test]
    fn test_stats_profile_is_named() {
        let registry = Arc::new(StatsRegistry::collecting());
        let calls = Arc::new(AtomicUsize::new(0));
        let anonymous = memoize(
            counted_square(&calls),
            MemoizeOptions::builder()
                .stats(Arc::clone(&registry))
                .build()
                .unwrap(),
        )
        .unwrap();
        let named = memoize(
            counted_square(&calls),
            MemoizeOptions::builder()
                .stats(Arc::clone(&registry))
                .profile_name("square")
                .build()
                .unwrap(),
        )
        .unwrap();

        assert_eq!(anonymous.profile_name(), Some("Anonymous 1"));
        assert_eq!(named.profile_name(), Some("square"));
    }

    #[test]
    fn test_expiration_without_runtime_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = memoize(counted_square(&calls), MemoizeOptions::max_age(100.0).unwrap());
        assert!(matches!(result, Err(CacheError::RuntimeUnavailable(_))));
    }

    #[tokio::test]
    async fn test_invalid_computed_expiration_rolls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let options = MemoizeOptions::builder()
            .expires(crate::config::Expires::computed(|_, _, _| -1.0))
            .build()
            .unwrap();
        let square = memoize(counted_square(&calls), options).unwrap();

        let deletes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&deletes);
        square.on(EventKind::Delete, move |event| {
            log.lock().push(event.reason);
            Ok(())
        });

        let err = square.call(&[Value::Int(2)]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::InvalidExpiration(_))
        ));
        assert!(square.is_empty());
        assert_eq!(deletes.lock().clone(), vec![Some(Reason::RolledBack)]);
    }

    #[tokio::test]
    async fn test_unreachable_expiration_deadline_rolls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let options = MemoizeOptions::builder()
            .expires(crate::config::Expires::computed(|_, _, _| 1e22))
            .build()
            .unwrap();
        let square = memoize(counted_square(&calls), options).unwrap();

        let err = square.call(&[Value::Int(3)]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::InvalidExpiration(_))
        ));
        assert!(square.is_empty());
        assert!(square.expirations().is_empty());
    }

    #[derive(Debug, Clone, PartialEq)]
    enum FetchError {
        Failed,
        Cache(CacheError),
    }

    impl From<CacheError> for FetchError {
        fn from(err: CacheError) -> Self {
            FetchError::Cache(err)
        }
    }

    #[tokio::test]
    async fn test_async_call_shares_pending_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetch = memoize_async(
            move |args: &[Value]| {
                counter.fetch_add(1, Ordering::SeqCst);
                let arg = args.first().cloned();
                async move {
                    tokio::task::yield_now().await;
                    match arg {
                        Some(Value::Int(n)) => Ok(n + 1),
                        _ => Err(FetchError::Failed),
                    }
                }
            },
            MemoizeOptions::default(),
        )
        .unwrap();

        let args = [Value::Int(1)];
        let (a, b) = tokio::join!(fetch.call(&args), fetch.call(&args));

        assert_eq!((a, b), (Ok(2), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_failure_is_evicted() {
        let fetch = memoize_async(
            |_: &[Value]| async { Err::<i64, _>(FetchError::Failed) },
            MemoizeOptions::default(),
        )
        .unwrap();

        assert_eq!(fetch.call(&[Value::Int(1)]).await, Err(FetchError::Failed));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(fetch.is_empty());
    }

    #[tokio::test]
    async fn test_async_set_with_resolved_value() {
        let fetch = memoize_async(
            |_: &[Value]| async { Ok::<i64, FetchError>(0) },
            MemoizeOptions::default(),
        )
        .unwrap();

        fetch.set(&[Value::Int(1)], resolved(7)).unwrap();
        assert_eq!(fetch.call(&[Value::Int(1)]).await, Ok(7));
    }

    #[test]
    fn test_async_requires_runtime() {
        let result = memoize_async(
            |_: &[Value]| async { Ok::<i64, FetchError>(0) },
            MemoizeOptions::default(),
        );
        assert!(matches!(result, Err(CacheError::RuntimeUnavailable(_))));
    }
}
