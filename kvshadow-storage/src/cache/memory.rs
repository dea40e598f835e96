//! In-memory cache driver with lazy TTL expiry.

use async_trait::async_trait;
use kvshadow_core::KvShadowResult;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::traits::{CacheStats, CacheStore};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Ordered in-memory cache.
///
/// Expiry uses `tokio::time::Instant`, so tests running with a paused clock
/// can advance time past a TTL. Expired entries are invisible to reads and
/// dropped on the next write or [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let removed = before - entries.len();
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.values().filter(|e| e.is_live(now)).count() as u64,
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> KvShadowResult<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let value = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone());
        self.record(value.is_some());
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> KvShadowResult<HashMap<String, String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            match entries.get(key).filter(|e| e.is_live(now)) {
                Some(entry) => {
                    self.record(true);
                    found.insert(key.clone(), entry.value.clone());
                }
                None => self.record(false),
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvShadowResult<()> {
        let now = Instant::now();
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: ttl.filter(|t| !t.is_zero()).map(|t| now + t),
        };
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvShadowResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn ttl(&self, key: &str) -> KvShadowResult<Option<Duration>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn scan(&self, prefix: &str, limit: usize) -> KvShadowResult<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCacheStore::new();
        cache.set("user:42", "alice", None).await.unwrap();
        assert_eq!(cache.get("user:42").await.unwrap().as_deref(), Some("alice"));
        assert!(cache.delete("user:42").await.unwrap());
        assert!(!cache.delete("user:42").await.unwrap());
        assert_eq!(cache.get("user:42").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = InMemoryCacheStore::new();
        cache
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(cache.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.ttl("k").await.unwrap(), Some(Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.ttl("k").await.unwrap(), None);
        assert_eq!(cache.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_means_no_expiry() {
        let cache = InMemoryCacheStore::new();
        cache.set("k", "v", Some(Duration::ZERO)).await.unwrap();
        assert_eq!(cache.ttl("k").await.unwrap(), None);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_mget_skips_missing() {
        let cache = InMemoryCacheStore::new();
        cache.set("a", "1", None).await.unwrap();
        cache.set("b", "2", None).await.unwrap();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = cache.mget(&keys).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("b").map(String::as_str), Some("2"));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 2);
    }

    #[tokio::test]
    async fn test_scan_by_prefix_with_limit() {
        let cache = InMemoryCacheStore::new();
        for key in ["session:1", "session:2", "session:3", "user:1", "sessio"] {
            cache.set(key, "x", None).await.unwrap();
        }
        let keys = cache.scan("session:", 10).await.unwrap();
        assert_eq!(keys, vec!["session:1", "session:2", "session:3"]);

        let keys = cache.scan("session:", 2).await.unwrap();
        assert_eq!(keys.len(), 2);

        let all = cache.scan("", 100).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
