//! Generic TTL cache used for the tick/negRisk/fee/orderbook caches in
//! component #12.
//!
//! Generalizes the teacher's `polymarket::user_ws::DedupCache` (a
//! TTL-bounded `HashMap` with lazy eviction on access) into a reusable
//! `K -> V` cache instead of the dedup-specific `K -> Instant` shape.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value if present and not expired. Eviction is
    /// lazy: a hit on an expired entry removes it and returns `None`.
    pub async fn get(&self, key: &K) -> Option<V> {
        let hit = {
            let entries = self.entries.read().await;
            entries.get(key).map(|e| (e.value.clone(), e.inserted_at))
        };
        match hit {
            Some((value, inserted_at)) if inserted_at.elapsed() < self.ttl => Some(value),
            Some(_) => {
                self.entries.write().await.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: K, value: V) {
        self.entries.write().await.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Fetches via `get`, or computes and stores via `fetch` on a miss.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get(&key).await {
            return Ok(v);
        }
        let value = fetch().await?;
        self.put(key, value.clone()).await;
        Ok(value)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_are_evicted_on_read() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_millis(10));
        cache.put("k".to_string(), 7).await;
        assert_eq!(cache.get(&"k".to_string()).await, Some(7));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn get_or_fetch_only_computes_once() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        let calls = std::sync::atomic::AtomicU32::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_fetch("k".to_string(), || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, ()>(42)
                })
                .await
                .unwrap();
            assert_eq!(v, 42);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
