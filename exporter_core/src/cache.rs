//! Read-through TTL cache shared by every updater.
//!
//! Values of different shapes live side by side under string keys. A read
//! names the type it expects; a stored value of another type is reported as
//! a miss (and logged), so a key collision can never hand a reader a value it
//! did not ask for.

use crate::error::Result;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

type CachedValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct CacheEntry {
    value: CachedValue,
    type_name: &'static str,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

pub struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the live value stored under `key` if it is a `T`.
    ///
    /// Absent, expired and mistyped entries all come back as `None`; callers
    /// fall through to the remote call.
    pub async fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let now = Instant::now();
        let entry = {
            let entries = self.entries.read().await;
            entries.get(key).cloned()
        }?;

        if entry.is_expired(now) {
            self.evict_if_expired(key).await;
            return None;
        }

        match entry.value.downcast::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(
                    key,
                    stored = entry.type_name,
                    expected = type_name::<T>(),
                    "Cached value has an unexpected type, treating as a miss"
                );
                None
            }
        }
    }

    pub async fn set<T>(&self, key: impl Into<String>, value: T, ttl: Duration)
    where
        T: Any + Send + Sync,
    {
        self.set_arc(key, Arc::new(value), ttl).await;
    }

    pub async fn set_default<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.set(key, value, self.default_ttl).await;
    }

    async fn set_arc<T>(&self, key: impl Into<String>, value: Arc<T>, ttl: Duration)
    where
        T: Any + Send + Sync,
    {
        let entry = CacheEntry {
            value,
            type_name: type_name::<T>(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Memoizes `fetch` under `key`. The lock is never held while `fetch`
    /// runs; two concurrent misses may both call it and the last write wins.
    pub async fn get_or_try_insert_with<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            debug!(key, "Cache hit");
            return Ok(value);
        }

        let value = Arc::new(fetch().await?);
        self.set_arc(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // Another writer may have refreshed the entry since the read.
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExporterError;

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache
            .set("sub-s-batchaccounts", vec!["a1".to_string()], Duration::from_secs(60))
            .await;

        let value = cache.get::<Vec<String>>("sub-s-batchaccounts").await.unwrap();
        assert_eq!(*value, vec!["a1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache.set("k", 42u32, Duration::from_secs(60)).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get::<u32>("k").await.as_deref(), Some(&42));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get::<u32>("k").await.is_none());
        // Lazily evicted on the expired read.
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache.set_default("k", "a string".to_string()).await;

        assert!(cache.get::<u64>("k").await.is_none());
        // The entry itself survives for readers of the right type.
        assert!(cache.get::<String>("k").await.is_some());
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with_memoizes() {
        let cache = TtlCache::new(Duration::from_secs(300));
        let calls = std::sync::atomic::AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, ExporterError>(7u8)
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = TtlCache::new(Duration::from_secs(300));
        let result = cache
            .get_or_try_insert_with::<u8, _, _>("k", Duration::from_secs(60), || async {
                Err(ExporterError::Throttled("slow down".into()))
            })
            .await;

        assert!(result.is_err());
        assert!(cache.get::<u8>("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache.set("short", 1u8, Duration::from_secs(1)).await;
        cache.set("long", 2u8, Duration::from_secs(600)).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get::<u8>("long").await.is_some());
    }
}
