//! [`SlidingExpirationCache`]: a generic K→V store with per-entry TTL, lazy
//! cleanup, and an optional background cleanup task (spec.md §4.2).

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::runtime::{self, CancellationToken};

/// A single stored value plus the instant at which it becomes eligible for
/// removal.
#[derive(Debug, Clone)]
struct CacheItem<V> {
    value: V,
    expiration: Instant,
}

impl<V> CacheItem<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expiration
    }
}

type ShouldDispose<V> = dyn Fn(&V) -> bool + Send + Sync;
type Dispose<V> = dyn Fn(V) + Send + Sync;

struct Inner<K, V> {
    map: RwLock<HashMap<K, CacheItem<V>>>,
    cleanup_interval: Duration,
    last_cleanup: StdMutex<Instant>,
    should_dispose: Option<Box<ShouldDispose<V>>>,
    dispose: Option<Box<Dispose<V>>>,
}

/// A K→V cache where reads do not refresh expiration but `put`/
/// `compute_if_absent` do (a "sliding" TTL keyed off explicit writes, not
/// off access).
///
/// Cloning a `SlidingExpirationCache` is cheap and shares the same backing
/// store, so it can be freely cloned across tasks.
pub struct SlidingExpirationCache<K, V> {
    inner: std::sync::Arc<Inner<K, V>>,
    background: Option<std::sync::Arc<Background>>,
}

impl<K, V> Clone for SlidingExpirationCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            background: self.background.clone(),
        }
    }
}

struct Background {
    token: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl<K, V> SlidingExpirationCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cleanup_interval: Duration) -> Self {
        Self::build(cleanup_interval, None, None, false)
    }

    /// Builds a cache whose entries are only removed when both expired and
    /// (if `should_dispose` returns) eligible, running `dispose` on removal.
    /// Disposer errors have no representation here by design (spec.md
    /// §4.2: "disposer errors are swallowed") — `dispose` returns `()`.
    pub fn with_disposal(
        cleanup_interval: Duration,
        should_dispose: impl Fn(&V) -> bool + Send + Sync + 'static,
        dispose: impl Fn(V) + Send + Sync + 'static,
    ) -> Self {
        Self::build(
            cleanup_interval,
            Some(Box::new(should_dispose)),
            Some(Box::new(dispose)),
            false,
        )
    }

    /// Like [`Self::new`] / [`Self::with_disposal`] but additionally runs
    /// cleanup on a background task every `cleanup_interval`, rather than
    /// only piggy-backing on mutating calls. [`Self::clear`] signals the
    /// task to stop and awaits its completion.
    pub fn with_background_cleanup(
        cleanup_interval: Duration,
        should_dispose: Option<Box<ShouldDispose<V>>>,
        dispose: Option<Box<Dispose<V>>>,
    ) -> Self {
        Self::build(cleanup_interval, should_dispose, dispose, true)
    }

    fn build(
        cleanup_interval: Duration,
        should_dispose: Option<Box<ShouldDispose<V>>>,
        dispose: Option<Box<Dispose<V>>>,
        spawn_background: bool,
    ) -> Self {
        let inner = std::sync::Arc::new(Inner {
            map: RwLock::new(HashMap::new()),
            cleanup_interval,
            last_cleanup: StdMutex::new(Instant::now()),
            should_dispose,
            dispose,
        });

        let background = if spawn_background {
            let token = CancellationToken::new();
            let task_inner = inner.clone();
            let task_token = token.clone();
            let handle = runtime::spawn(async move {
                loop {
                    if !task_token.sleep(task_inner.cleanup_interval).await {
                        return;
                    }
                    Inner::force_cleanup(&task_inner).await;
                }
            });
            Some(std::sync::Arc::new(Background {
                token,
                handle: StdMutex::new(Some(handle)),
            }))
        } else {
            None
        };

        Self { inner, background }
    }

    /// Returns the cached value for `key`, computing and inserting it via
    /// `f` if absent. A cache hit refreshes the entry's expiration to
    /// `now + ttl`; a miss inserts with that same expiration.
    pub async fn compute_if_absent<F, Fut>(&self, key: K, f: F, ttl: Duration) -> V
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = V>,
    {
        self.maybe_cleanup().await;

        {
            let mut map = self.inner.map.write().await;
            if let Some(item) = map.get_mut(&key) {
                item.expiration = Instant::now() + ttl;
                return item.value.clone();
            }
        }

        let value = f(key.clone()).await;
        let mut map = self.inner.map.write().await;
        let entry = map.entry(key).or_insert_with(|| CacheItem {
            value: value.clone(),
            expiration: Instant::now() + ttl,
        });
        entry.expiration = Instant::now() + ttl;
        entry.value.clone()
    }

    pub async fn put(&self, key: K, value: V, ttl: Duration) {
        self.maybe_cleanup().await;
        self.inner.map.write().await.insert(
            key,
            CacheItem {
                value,
                expiration: Instant::now() + ttl,
            },
        );
    }

    /// Inserts `value` only if `key` is absent; returns the value now stored
    /// (either the pre-existing one or the one just inserted).
    pub async fn put_if_absent(&self, key: K, value: V, ttl: Duration) -> V {
        self.maybe_cleanup().await;
        let mut map = self.inner.map.write().await;
        let entry = map.entry(key).or_insert_with(|| CacheItem {
            value,
            expiration: Instant::now() + ttl,
        });
        entry.value.clone()
    }

    /// Returns the value for `key` without refreshing its expiration. If the
    /// entry is expired and dispose-eligible, it is removed and disposed and
    /// `None` is returned.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.maybe_cleanup().await;

        let now = Instant::now();
        let mut map = self.inner.map.write().await;
        match map.get(key) {
            None => None,
            Some(item) if !item.is_expired(now) => Some(item.value.clone()),
            Some(item) => {
                let disposable = self
                    .inner
                    .should_dispose
                    .as_ref()
                    .map(|f| f(&item.value))
                    .unwrap_or(true);
                if disposable {
                    let removed = map.remove(key).unwrap();
                    drop(map);
                    if let Some(dispose) = &self.inner.dispose {
                        dispose(removed.value);
                    }
                    None
                } else {
                    Some(item.value.clone())
                }
            }
        }
    }

    pub async fn remove(&self, key: &K) {
        let removed = self.inner.map.write().await.remove(key);
        if let (Some(item), Some(dispose)) = (removed, &self.inner.dispose) {
            dispose(item.value);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains_key(&self, key: &K) -> bool {
        self.inner.map.read().await.contains_key(key)
    }

    /// Disposes every entry and empties the cache. If a background cleanup
    /// task is running, signals it to stop and awaits its completion first.
    pub async fn clear(&self) {
        if let Some(background) = &self.background {
            background.token.cancel();
            let handle = background.handle.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }

        let mut map = self.inner.map.write().await;
        let drained: Vec<_> = map.drain().collect();
        drop(map);
        if let Some(dispose) = &self.inner.dispose {
            for (_, item) in drained {
                dispose(item.value);
            }
        }
    }

    async fn maybe_cleanup(&self) {
        let should_run = {
            let mut last = self.inner.last_cleanup.lock().unwrap();
            if last.elapsed() >= self.inner.cleanup_interval {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if should_run {
            Inner::force_cleanup(&self.inner).await;
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn force_cleanup(inner: &std::sync::Arc<Self>) {
        let now = Instant::now();
        let mut map = inner.map.write().await;
        let expired_keys: Vec<K> = map
            .iter()
            .filter(|(_, item)| {
                item.is_expired(now)
                    && inner
                        .should_dispose
                        .as_ref()
                        .map(|f| f(&item.value))
                        .unwrap_or(true)
            })
            .map(|(k, _)| k.clone())
            .collect();

        let mut disposed = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(item) = map.remove(&key) {
                disposed.push(item.value);
            }
        }
        drop(map);

        if let Some(dispose) = &inner.dispose {
            for value in disposed {
                dispose(value);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn get_after_put_returns_value_within_ttl() {
        let cache: SlidingExpirationCache<&str, i32> =
            SlidingExpirationCache::new(Duration::from_secs(60));
        cache.put("a", 1, Duration::from_secs(60)).await;
        assert_eq!(cache.get(&"a").await, Some(1));
    }

    #[tokio::test]
    async fn get_does_not_refresh_expiration() {
        let cache: SlidingExpirationCache<&str, i32> =
            SlidingExpirationCache::new(Duration::from_millis(1));
        cache.put("a", 1, Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        // expired and default-disposable (no should_dispose predicate) -> None
        assert_eq!(cache.get(&"a").await, None);
    }

    #[tokio::test]
    async fn compute_if_absent_refreshes_on_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: SlidingExpirationCache<&str, i32> =
            SlidingExpirationCache::new(Duration::from_secs(60));

        let calls2 = calls.clone();
        let v1 = cache
            .compute_if_absent(
                "a",
                |_| {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        42
                    }
                },
                Duration::from_secs(60),
            )
            .await;
        assert_eq!(v1, 42);

        let calls3 = calls.clone();
        let v2 = cache
            .compute_if_absent(
                "a",
                |_| {
                    let calls = calls3.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        99
                    }
                },
                Duration::from_secs(60),
            )
            .await;
        assert_eq!(v2, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_runs_disposer() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let disposed2 = disposed.clone();
        let cache: SlidingExpirationCache<&str, i32> = SlidingExpirationCache::with_disposal(
            Duration::from_secs(60),
            |_| true,
            move |_| {
                disposed2.fetch_add(1, Ordering::SeqCst);
            },
        );
        cache.put("a", 1, Duration::from_secs(60)).await;
        cache.remove(&"a").await;
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"a").await, None);
    }

    #[tokio::test]
    async fn should_dispose_predicate_keeps_ineligible_expired_entries() {
        let cache: SlidingExpirationCache<&str, i32> = SlidingExpirationCache::with_disposal(
            Duration::from_millis(1),
            |v: &i32| *v > 0,
            |_| {},
        );
        cache.put("neg", -1, Duration::from_millis(5)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        // expired, but should_dispose(-1) is false, so it survives `get`.
        assert_eq!(cache.get(&"neg").await, Some(-1));
    }

    #[tokio::test]
    async fn clear_disposes_all_entries() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let disposed2 = disposed.clone();
        let cache: SlidingExpirationCache<&str, i32> = SlidingExpirationCache::with_disposal(
            Duration::from_secs(60),
            |_| true,
            move |_| {
                disposed2.fetch_add(1, Ordering::SeqCst);
            },
        );
        cache.put("a", 1, Duration::from_secs(60)).await;
        cache.put("b", 2, Duration::from_secs(60)).await;
        cache.clear().await;
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn background_cleanup_task_removes_expired_entries_without_explicit_get() {
        let cache: SlidingExpirationCache<&str, i32> =
            SlidingExpirationCache::with_background_cleanup(Duration::from_millis(10), None, None);
        cache.put("a", 1, Duration::from_millis(5)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.len().await, 0);
        cache.clear().await;
    }
}
