//! Cache store boundary.

use async_trait::async_trait;
use kvshadow_core::KvShadowResult;
use std::collections::HashMap;
use std::time::Duration;

/// Key-value cache driver consumed by the engine.
///
/// Implementations must give read-after-write on a single key. Nothing is
/// assumed across keys.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the live value of a key.
    async fn get(&self, key: &str) -> KvShadowResult<Option<String>>;

    /// Get several keys in one round trip. Missing keys are absent from the map.
    async fn mget(&self, keys: &[String]) -> KvShadowResult<HashMap<String, String>>;

    /// Set a key, with an optional expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvShadowResult<()>;

    /// Delete a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> KvShadowResult<bool>;

    /// Remaining time to live. `None` when the key has no expiry or does not exist.
    async fn ttl(&self, key: &str) -> KvShadowResult<Option<Duration>>;

    /// Up to `limit` keys starting with `prefix`.
    async fn scan(&self, prefix: &str, limit: usize) -> KvShadowResult<Vec<String>>;
}

/// Hit/miss counters for a cache driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Live (non-expired) entries.
    pub entry_count: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
}

impl CacheStats {
    /// Hit rate in 0.0..=1.0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
