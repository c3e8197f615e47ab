//! [`CacheMap`]: the simpler cache variant without disposal hooks, used for
//! cheap value types where teardown is a no-op (spec.md §4.2).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    expiration: Instant,
}

/// A plain sliding-TTL map: no disposer, no background task. `get` does not
/// refresh expiration; `put` does.
pub struct CacheMap<K, V> {
    map: Arc<RwLock<HashMap<K, Entry<V>>>>,
}

impl<K, V> Clone for CacheMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<K, V> Default for CacheMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            map: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K, V> CacheMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: K, value: V, ttl: Duration) {
        self.map.write().await.insert(
            key,
            Entry {
                value,
                expiration: Instant::now() + ttl,
            },
        );
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut map = self.map.write().await;
        match map.get(key) {
            Some(entry) if now > entry.expiration => {
                map.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub async fn remove(&self, key: &K) {
        self.map.write().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn get_after_put_within_ttl() {
        let map: CacheMap<&str, i32> = CacheMap::new();
        map.put("a", 1, Duration::from_secs(60)).await;
        assert_eq!(map.get(&"a").await, Some(1));
    }

    #[tokio::test]
    async fn get_after_ttl_elapses_is_none() {
        let map: CacheMap<&str, i32> = CacheMap::new();
        map.put("a", 1, Duration::from_millis(5)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(map.get(&"a").await, None);
    }
}
