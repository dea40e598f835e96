//! KV write path: cache mutation first, then consistency tracking.

use kvshadow_core::{
    normalize_ttl, KvShadowResult, SyncResult, ValidationError, VerificationConfig,
};
use kvshadow_storage::CacheStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::hybrid::{HybridSynchronizer, KvWrite};

/// Result of a write-path mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct KvWriteOutcome {
    /// The cache mutation took effect. For deletes, whether the key existed.
    pub ok: bool,
    /// Outcome of the shadow sync that followed it.
    pub sync: SyncResult,
}

/// Writes the cache and hands every mutation to the synchronizer.
pub struct KvWritePath {
    cache: Arc<dyn CacheStore>,
    synchronizer: Arc<HybridSynchronizer>,
    limits: VerificationConfig,
}

impl KvWritePath {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        synchronizer: Arc<HybridSynchronizer>,
        limits: VerificationConfig,
    ) -> Self {
        Self {
            cache,
            synchronizer,
            limits,
        }
    }

    /// Set a key in the cache, then track it with `adaptive_sync`.
    ///
    /// A cache failure is returned as an error and nothing is synced.
    pub async fn set(&self, write: KvWrite) -> KvShadowResult<KvWriteOutcome> {
        require_key(&write.key)?;
        let ttl = normalize_ttl(write.ttl_secs).map(Duration::from_secs);
        self.cache.set(&write.key, &write.value, ttl).await?;

        let sync = self.synchronizer.adaptive_sync(write).await;
        Ok(KvWriteOutcome { ok: true, sync })
    }

    /// Delete a key from the cache, then track the delete.
    pub async fn delete(&self, key: &str) -> KvShadowResult<KvWriteOutcome> {
        require_key(key)?;
        let existed = self.cache.delete(key).await?;
        let sync = self.synchronizer.sync_delete(key).await;
        Ok(KvWriteOutcome { ok: existed, sync })
    }

    pub async fn get(&self, key: &str) -> KvShadowResult<Option<String>> {
        require_key(key)?;
        self.cache.get(key).await
    }

    pub async fn mget(&self, keys: &[String]) -> KvShadowResult<HashMap<String, String>> {
        self.cache.mget(keys).await
    }

    pub async fn ttl(&self, key: &str) -> KvShadowResult<Option<Duration>> {
        require_key(key)?;
        self.cache.ttl(key).await
    }

    /// Keys under `prefix`. Non-positive limits use the default, large ones
    /// are capped.
    pub async fn scan(&self, prefix: &str, limit: i64) -> KvShadowResult<Vec<String>> {
        self.cache
            .scan(prefix, self.limits.clamp_scan_limit(limit))
            .await
    }
}

fn require_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "key".to_string(),
        });
    }
    Ok(())
}
