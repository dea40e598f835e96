//! Sync Verification & Repair
//!
//! Read-only diagnostics comparing the live cache against the shadow store,
//! plus a single-key repair that treats the cache as ground truth.
//!
//! `verify_sync` walks the shadow store page by page, with one `mget` per
//! page, so memory stays bounded by the page size plus the issues found.

use chrono::{DateTime, Utc};
use kvshadow_core::constants::NO_EXPIRY_TTL;
use kvshadow_core::{
    ComparisonReport, HealthCheck, KeySyncStatus, KvShadowResult, MismatchEntry, RepairAction,
    RepairOutcome, ShadowMetadata, ShadowRecord, StalenessReport, SyncVerificationReport,
    Timestamp, TtlReport, VerificationConfig, WriteSequencer,
};
use kvshadow_storage::{CacheStore, OutboxStore, ShadowStore};
use std::sync::Arc;
use std::time::Instant;

/// Compares cache and shadow, and repairs single keys on request.
pub struct SyncVerifier {
    cache: Arc<dyn CacheStore>,
    shadows: Arc<dyn ShadowStore>,
    outbox: Arc<dyn OutboxStore>,
    sequencer: Arc<WriteSequencer>,
    config: VerificationConfig,
}

impl SyncVerifier {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        shadows: Arc<dyn ShadowStore>,
        outbox: Arc<dyn OutboxStore>,
        sequencer: Arc<WriteSequencer>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            cache,
            shadows,
            outbox,
            sequencer,
            config,
        }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    // ========================================================================
    // READ-ONLY CHECKS
    // ========================================================================

    /// Full verification: outbox backlog, cache-vs-shadow comparison and
    /// staleness, rolled into one verdict.
    pub async fn verify_sync(&self) -> KvShadowResult<SyncVerificationReport> {
        let unprocessed = self.outbox.count_unprocessed().await?;

        let now = Utc::now();
        let cutoff = self.stale_cutoff(now);
        let page_size = self.config.page_size.max(1);

        let mut checked = 0u64;
        let mut mismatches = Vec::new();
        let mut stale_keys = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page = self.shadows.scan_page(after.as_deref(), page_size).await?;
            if !page.records.is_empty() {
                let keys: Vec<String> = page.records.iter().map(|r| r.key.clone()).collect();
                let live = self.cache.mget(&keys).await?;

                for record in page.records {
                    checked += 1;
                    if record.last_write_at < cutoff {
                        stale_keys.push(record.key.clone());
                    }
                    let cache_value = live.get(&record.key).cloned();
                    if cache_value.as_deref() != Some(record.last_value.as_str()) {
                        mismatches.push(MismatchEntry {
                            key: record.key,
                            cache_value,
                            shadow_value: record.last_value,
                            shadow_fingerprint: record.fingerprint,
                            last_write_at: record.last_write_at,
                        });
                    }
                }
            }
            match page.next_after {
                Some(next) => after = Some(next),
                None => break,
            }
        }

        let report = SyncVerificationReport::new(
            unprocessed,
            ComparisonReport::new(checked, mismatches),
            StalenessReport::new(stale_keys, cutoff),
        );
        tracing::debug!(
            checked_keys = checked,
            mismatches = report.comparison.mismatches.len(),
            stale = report.staleness.stale_count,
            unprocessed_events = unprocessed,
            overall = %report.overall,
            "Sync verification completed"
        );
        Ok(report)
    }

    /// Compare one key. With no shadow record the key is in sync only when
    /// the cache has no value either.
    pub async fn verify_key_sync(&self, key: &str) -> KvShadowResult<KeySyncStatus> {
        let cache_value = self.cache.get(key).await?;
        let shadow = self.shadows.get(key).await?;

        let in_sync = match &shadow {
            Some(record) => cache_value.as_deref() == Some(record.last_value.as_str()),
            None => cache_value.is_none(),
        };

        Ok(KeySyncStatus {
            key: key.to_string(),
            cache_exists: cache_value.is_some(),
            cache_value,
            shadow_exists: shadow.is_some(),
            shadow_value: shadow.as_ref().map(|r| r.last_value.clone()),
            shadow_fingerprint: shadow.as_ref().map(|r| r.fingerprint.clone()),
            last_write_at: shadow.as_ref().map(|r| r.last_write_at),
            session_id: shadow.as_ref().and_then(|r| r.session_id.clone()),
            interaction_id: shadow.as_ref().and_then(|r| r.interaction_id.clone()),
            in_sync,
        })
    }

    /// Remaining TTL, in seconds, of cache keys under `prefix`. Keys without
    /// an expiry report `-1`. Never touches the shadow store.
    pub async fn cache_ttl_info(&self, prefix: &str, limit: i64) -> KvShadowResult<TtlReport> {
        let limit = self.config.clamp_scan_limit(limit);
        let keys = self.cache.scan(prefix, limit).await?;

        let mut report = TtlReport {
            scanned_keys: keys.len() as u64,
            ..Default::default()
        };
        for key in keys {
            let ttl = match self.cache.ttl(&key).await? {
                Some(remaining) => i64::try_from(remaining.as_secs()).unwrap_or(i64::MAX),
                None => NO_EXPIRY_TTL,
            };
            report.ttl_info.insert(key, ttl);
        }
        Ok(report)
    }

    /// Run [`verify_sync`](Self::verify_sync) and map it onto a health check.
    pub async fn health_check(&self) -> HealthCheck {
        let started = Instant::now();
        let check = match self.verify_sync().await {
            Ok(report) => report.to_health_check(),
            Err(e) => HealthCheck::unhealthy("cache_sync", format!("Verification failed: {}", e)),
        };
        check.with_response_time(started.elapsed().as_millis() as i64)
    }

    // ========================================================================
    // REPAIR
    // ========================================================================

    /// Force the shadow record for `key` to agree with the cache.
    ///
    /// Destructive toward the shadow store. Running it over many keys can
    /// hide a stuck projector; check the outbox backlog first.
    pub async fn force_sync_repair(&self, key: &str) -> RepairOutcome {
        match self.repair(key).await {
            Ok(action) => {
                if action != RepairAction::NoRepairNeeded {
                    tracing::info!(key = %key, action = %action, "Shadow record repaired");
                }
                RepairOutcome::succeeded(key, action)
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Shadow repair failed");
                RepairOutcome::failed(key, e.to_string())
            }
        }
    }

    async fn repair(&self, key: &str) -> KvShadowResult<RepairAction> {
        let cache_value = self.cache.get(key).await?;
        let shadow = self.shadows.get(key).await?;

        match (cache_value, shadow) {
            (Some(value), None) => {
                let record =
                    ShadowRecord::new(key, value, self.sequencer.next(), ShadowMetadata::repair());
                self.shadows.upsert(&record).await?;
                Ok(RepairAction::CreatedShadow)
            }
            (None, Some(_)) => {
                self.shadows.delete(key).await?;
                Ok(RepairAction::RemovedShadow)
            }
            (Some(value), Some(mut record)) if value != record.last_value => {
                record.set_value(value);
                record.write_seq = self.sequencer.next();
                record.metadata = ShadowMetadata::repair();
                self.shadows.upsert(&record).await?;
                Ok(RepairAction::UpdatedShadow)
            }
            _ => Ok(RepairAction::NoRepairNeeded),
        }
    }

    fn stale_cutoff(&self, now: Timestamp) -> Timestamp {
        chrono::Duration::from_std(self.config.stale_threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
