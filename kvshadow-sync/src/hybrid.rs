//! Hybrid Synchronizer
//!
//! Every cache mutation gets exactly one durable record of intent: either a
//! direct shadow write finished within the timeout, or an outbox event the
//! projector applies later. The direct attempt runs on the bounded
//! [`WorkerPool`]; when it is slow, fails, or is skipped because the system
//! is saturated, the mutation is appended to the outbox instead.
//!
//! Each call takes one sequence number from the [`WriteSequencer`] before
//! either path runs. The direct and fallback paths carry the same number, so
//! a queued event never overwrites a newer direct write. Two direct writes
//! racing on one key are last-write-wins: the sequence check and the upsert
//! are separate store calls, and verification repairs any drift.

use kvshadow_core::{
    normalize_ttl, FallbackReason, HybridSyncConfig, KvShadowResult, LoadAssessment, OutboxCounts,
    OutboxEvent, OutboxPayload, ShadowMetadata, ShadowRecord, SyncConfiguration, SyncCounters,
    SyncResult, SyncStats, WriteSequencer,
};
use kvshadow_storage::{OutboxStore, ShadowStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::pool::WorkerPool;

// ============================================================================
// REQUEST
// ============================================================================

/// A cache set to be tracked in the shadow store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvWrite {
    pub key: String,
    pub value: String,
    /// TTL the cache write used. `<= 0` means no expiry.
    pub ttl_secs: Option<i64>,
    pub session_id: Option<String>,
    pub interaction_id: Option<String>,
}

impl KvWrite {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl_secs: None,
            session_id: None,
            interaction_id: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_interaction(mut self, interaction_id: impl Into<String>) -> Self {
        self.interaction_id = Some(interaction_id.into());
        self
    }

    fn to_payload(&self, write_seq: u64) -> OutboxPayload {
        OutboxPayload::set(self.key.clone(), self.value.clone(), self.ttl_secs)
            .with_session(self.session_id.clone())
            .with_interaction(self.interaction_id.clone())
            .with_write_seq(write_seq)
    }

    fn to_record(&self, write_seq: u64) -> ShadowRecord {
        ShadowRecord::new(
            self.key.clone(),
            self.value.clone(),
            write_seq,
            ShadowMetadata::direct(normalize_ttl(self.ttl_secs)),
        )
        .with_correlation(self.session_id.clone(), self.interaction_id.clone())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Lifetime counters of synchronizer decisions.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    pub direct: AtomicU64,
    pub queued: AtomicU64,
    pub both_failed: AtomicU64,
    /// Calls that skipped the direct path because of load.
    pub high_load_skips: AtomicU64,
}

impl SyncMetrics {
    pub fn snapshot(&self) -> SyncCounters {
        SyncCounters {
            direct: self.direct.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            both_failed: self.both_failed.load(Ordering::Relaxed),
            high_load_skips: self.high_load_skips.load(Ordering::Relaxed),
        }
    }
}

/// What the direct path did to the shadow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectOutcome {
    Written,
    Deleted,
    Absent,
    /// A write with a newer sequence already owns the record.
    Superseded,
}

// ============================================================================
// SYNCHRONIZER
// ============================================================================

/// Routes each cache mutation to the direct path or the outbox.
pub struct HybridSynchronizer {
    shadows: Arc<dyn ShadowStore>,
    outbox: Arc<dyn OutboxStore>,
    pool: WorkerPool,
    sequencer: Arc<WriteSequencer>,
    config: HybridSyncConfig,
    metrics: SyncMetrics,
}

impl HybridSynchronizer {
    pub fn new(
        shadows: Arc<dyn ShadowStore>,
        outbox: Arc<dyn OutboxStore>,
        pool: WorkerPool,
        sequencer: Arc<WriteSequencer>,
        config: HybridSyncConfig,
    ) -> Self {
        Self {
            shadows,
            outbox,
            pool,
            sequencer,
            config,
            metrics: SyncMetrics::default(),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &HybridSyncConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Track a cache set: direct shadow upsert, falling back to the outbox.
    pub async fn sync_set(&self, write: KvWrite) -> SyncResult {
        let seq = self.sequencer.next();
        let record = write.to_record(seq);
        let shadows = Arc::clone(&self.shadows);
        let handle = self
            .pool
            .spawn(async move { direct_upsert(shadows.as_ref(), record).await });

        match self.await_direct(&write.key, handle).await {
            Ok(outcome) => self.direct_succeeded(&write.key, outcome),
            Err(reason) => self.enqueue(write.to_payload(seq), reason).await,
        }
    }

    /// Track a cache delete: direct shadow removal, falling back to a
    /// tombstone event.
    pub async fn sync_delete(&self, key: &str) -> SyncResult {
        let seq = self.sequencer.next();
        let shadows = Arc::clone(&self.shadows);
        let owned_key = key.to_string();
        let handle = self
            .pool
            .spawn(async move { direct_delete(shadows.as_ref(), &owned_key, seq).await });

        match self.await_direct(key, handle).await {
            Ok(outcome) => self.direct_succeeded(key, outcome),
            Err(reason) => {
                let payload = OutboxPayload::tombstone(key).with_write_seq(seq);
                self.enqueue(payload, reason).await
            }
        }
    }

    /// Like [`sync_set`](Self::sync_set), but goes straight to the outbox
    /// when the system is under high load.
    pub async fn adaptive_sync(&self, write: KvWrite) -> SyncResult {
        if self.is_under_high_load().await {
            self.metrics.high_load_skips.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %write.key, "High load, skipping direct shadow write");
            let seq = self.sequencer.next();
            return self
                .enqueue(write.to_payload(seq), FallbackReason::HighLoad)
                .await;
        }
        self.sync_set(write).await
    }

    /// Load-aware variant of [`sync_delete`](Self::sync_delete).
    pub async fn adaptive_delete(&self, key: &str) -> SyncResult {
        if self.is_under_high_load().await {
            self.metrics.high_load_skips.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "High load, skipping direct shadow delete");
            let payload = OutboxPayload::tombstone(key).with_write_seq(self.sequencer.next());
            return self.enqueue(payload, FallbackReason::HighLoad).await;
        }
        self.sync_delete(key).await
    }

    /// Returns true if the direct path should be skipped.
    ///
    /// The pool signals are checked first; the outbox backlog is only
    /// queried when the pool looks healthy.
    pub async fn is_under_high_load(&self) -> bool {
        let pool = self.pool.utilization();
        if pool.is_saturated(self.config.saturation_ratio) || pool.queued > 0 {
            return true;
        }
        self.assess_load().await.high_load
    }

    /// Every load signal with the counts behind it.
    pub async fn assess_load(&self) -> LoadAssessment {
        let pool = self.pool.utilization();
        let unprocessed = match self.outbox.count_unprocessed().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "Could not count unprocessed outbox events");
                None
            }
        };
        LoadAssessment::new(
            pool,
            self.config.saturation_ratio,
            unprocessed,
            self.config.event_backlog_threshold,
        )
    }

    /// Pool utilisation, configuration, outbox counts and decision counters.
    pub async fn sync_stats(&self) -> KvShadowResult<SyncStats> {
        let unprocessed = self.outbox.count_unprocessed().await?;
        let total = self.outbox.count_total().await?;
        Ok(SyncStats {
            pool: self.pool.utilization(),
            configuration: SyncConfiguration {
                direct_timeout_ms: self.config.direct_timeout.as_millis() as u64,
                pool_size: self.config.pool_size as u64,
            },
            outbox_events: OutboxCounts { unprocessed, total },
            counters: self.metrics.snapshot(),
        })
    }

    /// Wait for the direct attempt up to the configured timeout.
    ///
    /// On timeout the task is aborted. A store call already in flight may
    /// still land afterwards; that write carries the same sequence as the
    /// fallback event, which the projector then treats as already applied.
    async fn await_direct(
        &self,
        key: &str,
        mut handle: JoinHandle<KvShadowResult<DirectOutcome>>,
    ) -> Result<DirectOutcome, FallbackReason> {
        let started = Instant::now();
        match tokio::time::timeout(self.config.direct_timeout, &mut handle).await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => {
                tracing::warn!(key = %key, error = %e, "Direct shadow write failed");
                Err(FallbackReason::DirectFailed)
            }
            Ok(Err(join_err)) => {
                tracing::warn!(key = %key, error = %join_err, "Direct shadow write task did not complete");
                Err(FallbackReason::DirectFailed)
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    key = %key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    timeout_ms = self.config.direct_timeout.as_millis() as u64,
                    "Direct shadow write timed out"
                );
                Err(FallbackReason::DirectTimeout)
            }
        }
    }

    fn direct_succeeded(&self, key: &str, outcome: DirectOutcome) -> SyncResult {
        self.metrics.direct.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, outcome = ?outcome, "Direct shadow sync completed");
        let message = match outcome {
            DirectOutcome::Written => "Shadow record updated directly",
            DirectOutcome::Deleted => "Shadow record deleted directly",
            DirectOutcome::Absent => "No shadow record to delete",
            DirectOutcome::Superseded => "Newer write already recorded in shadow",
        };
        SyncResult::direct(message)
    }

    async fn enqueue(&self, payload: OutboxPayload, reason: FallbackReason) -> SyncResult {
        let event = OutboxEvent::key_mutated(&payload.with_fallback_reason(reason));
        match self.outbox.append(&event).await {
            Ok(()) => {
                self.metrics.queued.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    key = event.key().unwrap_or_default(),
                    event_id = %event.id,
                    reason = %reason,
                    "Shadow sync queued for async processing"
                );
                SyncResult::queued(format!("Queued for async processing ({})", reason))
            }
            Err(e) => {
                self.metrics.both_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    key = event.key().unwrap_or_default(),
                    reason = %reason,
                    error = %e,
                    "Both direct and queued shadow sync failed"
                );
                SyncResult::both_failed(format!("Both direct and queued sync failed: {}", e))
            }
        }
    }
}

/// Check-then-write; not atomic against a concurrent direct write.
async fn direct_upsert(
    shadows: &dyn ShadowStore,
    record: ShadowRecord,
) -> KvShadowResult<DirectOutcome> {
    if let Some(existing) = shadows.get(&record.key).await? {
        if existing.write_seq > record.write_seq {
            return Ok(DirectOutcome::Superseded);
        }
    }
    shadows.upsert(&record).await?;
    Ok(DirectOutcome::Written)
}

async fn direct_delete(
    shadows: &dyn ShadowStore,
    key: &str,
    seq: u64,
) -> KvShadowResult<DirectOutcome> {
    match shadows.get(key).await? {
        None => Ok(DirectOutcome::Absent),
        Some(existing) if existing.write_seq > seq => Ok(DirectOutcome::Superseded),
        Some(_) => {
            shadows.delete(key).await?;
            Ok(DirectOutcome::Deleted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvshadow_core::{SyncMethod, WriteSource};
    use kvshadow_storage::{
        DocumentOutboxStore, DocumentShadowStore, InMemoryDocumentStore,
    };
    use kvshadow_test_utils::{CountingShadowStore, FaultyOutboxStore, FaultyShadowStore};
    use std::time::Duration;

    struct Fixture {
        shadows: Arc<DocumentShadowStore<InMemoryDocumentStore>>,
        outbox: Arc<DocumentOutboxStore<InMemoryDocumentStore>>,
    }

    fn fixture() -> Fixture {
        let docs = Arc::new(InMemoryDocumentStore::new());
        Fixture {
            shadows: Arc::new(DocumentShadowStore::new(Arc::clone(&docs))),
            outbox: Arc::new(DocumentOutboxStore::new(docs)),
        }
    }

    fn synchronizer(
        shadows: Arc<dyn ShadowStore>,
        outbox: Arc<dyn OutboxStore>,
        config: HybridSyncConfig,
    ) -> HybridSynchronizer {
        HybridSynchronizer::new(
            shadows,
            outbox,
            WorkerPool::new(config.pool_size),
            Arc::new(WriteSequencer::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_sync_set_direct() {
        let f = fixture();
        let sync = synchronizer(f.shadows.clone(), f.outbox.clone(), HybridSyncConfig::default());

        let write = KvWrite::new("user:42", "alice")
            .with_ttl(3600)
            .with_session("s1");
        let result = sync.sync_set(write).await;
        assert!(result.success);
        assert_eq!(result.method, SyncMethod::Direct);

        let record = f.shadows.get("user:42").await.unwrap().unwrap();
        assert_eq!(record.last_value, "alice");
        assert_eq!(record.session_id.as_deref(), Some("s1"));
        assert_eq!(record.metadata.source, WriteSource::Direct);
        assert_eq!(record.metadata.ttl_secs, Some(3600));
        assert_eq!(f.outbox.count_total().await.unwrap(), 0);
        assert_eq!(sync.metrics().snapshot().direct, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_set_timeout_falls_back_to_outbox() {
        let f = fixture();
        let slow = Arc::new(FaultyShadowStore::new(f.shadows.clone()));
        slow.set_delay(Some(Duration::from_secs(10)));
        let config = HybridSyncConfig::default().with_direct_timeout(Duration::from_millis(100));
        let sync = synchronizer(slow, f.outbox.clone(), config);

        let result = sync.sync_set(KvWrite::new("k", "v")).await;
        assert!(result.success);
        assert_eq!(result.method, SyncMethod::Queued);

        let events = f.outbox.fetch_unprocessed(10).await.unwrap();
        assert_eq!(events.len(), 1);
        let payload = events[0].kv_payload().unwrap();
        assert_eq!(payload.key, "k");
        assert_eq!(payload.fallback_reason, Some(FallbackReason::DirectTimeout));
        assert!(payload.write_seq.is_some());
    }

    #[tokio::test]
    async fn test_sync_set_failure_falls_back_to_outbox() {
        let f = fixture();
        let failing = Arc::new(FaultyShadowStore::new(f.shadows.clone()));
        failing.set_failing(true);
        let sync = synchronizer(failing, f.outbox.clone(), HybridSyncConfig::default());

        let result = sync.sync_set(KvWrite::new("k", "v")).await;
        assert_eq!(result.method, SyncMethod::Queued);
        let events = f.outbox.fetch_unprocessed(10).await.unwrap();
        assert_eq!(
            events[0].kv_payload().unwrap().fallback_reason,
            Some(FallbackReason::DirectFailed)
        );
    }

    #[tokio::test]
    async fn test_both_paths_failing_is_reported() {
        let f = fixture();
        let shadows = Arc::new(FaultyShadowStore::new(f.shadows.clone()));
        shadows.set_failing(true);
        let outbox = Arc::new(FaultyOutboxStore::new(f.outbox.clone()));
        outbox.set_failing(true);
        let sync = synchronizer(shadows, outbox, HybridSyncConfig::default());

        let result = sync.sync_set(KvWrite::new("k", "v")).await;
        assert!(!result.success);
        assert_eq!(result.method, SyncMethod::BothFailed);
        assert_eq!(sync.metrics().snapshot().both_failed, 1);
    }

    #[tokio::test]
    async fn test_sync_delete_direct_and_tombstone_fallback() {
        let f = fixture();
        let sync = synchronizer(f.shadows.clone(), f.outbox.clone(), HybridSyncConfig::default());
        sync.sync_set(KvWrite::new("k", "v")).await;

        let result = sync.sync_delete("k").await;
        assert_eq!(result.method, SyncMethod::Direct);
        assert!(f.shadows.get("k").await.unwrap().is_none());

        let failing = Arc::new(FaultyShadowStore::new(f.shadows.clone()));
        failing.set_failing(true);
        let sync = synchronizer(failing, f.outbox.clone(), HybridSyncConfig::default());
        let result = sync.sync_delete("k").await;
        assert_eq!(result.method, SyncMethod::Queued);
        let events = f.outbox.fetch_unprocessed(10).await.unwrap();
        assert!(events[0].kv_payload().unwrap().is_tombstone());
    }

    #[tokio::test]
    async fn test_adaptive_sync_skips_direct_when_pool_saturated() {
        let f = fixture();
        let counting = Arc::new(CountingShadowStore::new(f.shadows.clone()));
        let sync = synchronizer(counting.clone(), f.outbox.clone(), HybridSyncConfig::default());

        // 8 of 10 slots busy trips the 80% threshold.
        let _held: Vec<_> = (0..8).filter_map(|_| sync.pool().try_reserve()).collect();
        assert!(sync.is_under_high_load().await);

        let result = sync.adaptive_sync(KvWrite::new("k", "v")).await;
        assert_eq!(result.method, SyncMethod::Queued);
        assert_eq!(counting.writes(), 0);
        assert_eq!(f.outbox.count_total().await.unwrap(), 1);
        assert_eq!(sync.metrics().snapshot().high_load_skips, 1);

        let events = f.outbox.fetch_unprocessed(10).await.unwrap();
        assert_eq!(
            events[0].kv_payload().unwrap().fallback_reason,
            Some(FallbackReason::HighLoad)
        );
    }

    #[tokio::test]
    async fn test_adaptive_sync_uses_direct_when_idle() {
        let f = fixture();
        let sync = synchronizer(f.shadows.clone(), f.outbox.clone(), HybridSyncConfig::default());
        let _held: Vec<_> = (0..7).filter_map(|_| sync.pool().try_reserve()).collect();
        let result = sync.adaptive_sync(KvWrite::new("k", "v")).await;
        assert_eq!(result.method, SyncMethod::Direct);
    }

    #[tokio::test]
    async fn test_event_backlog_trips_high_load() {
        let f = fixture();
        let config = HybridSyncConfig::default().with_event_backlog_threshold(2);
        let sync = synchronizer(f.shadows.clone(), f.outbox.clone(), config);
        for i in 0..3 {
            let event = OutboxEvent::key_mutated(&OutboxPayload::set(format!("k{}", i), "v", None));
            f.outbox.append(&event).await.unwrap();
        }

        let load = sync.assess_load().await;
        assert!(load.event_backlog);
        assert!(!load.pool_saturated);
        assert!(sync.is_under_high_load().await);

        let result = sync.adaptive_delete("k0").await;
        assert_eq!(result.method, SyncMethod::Queued);
    }

    #[tokio::test]
    async fn test_backlog_count_failure_is_not_high_load() {
        let f = fixture();
        let outbox = Arc::new(FaultyOutboxStore::new(f.outbox.clone()));
        outbox.set_failing(true);
        let sync = synchronizer(f.shadows.clone(), outbox, HybridSyncConfig::default());

        let load = sync.assess_load().await;
        assert_eq!(load.unprocessed_events, None);
        assert!(!load.high_load);
    }

    #[tokio::test]
    async fn test_direct_write_never_overwrites_newer_sequence() {
        let f = fixture();
        let newer = ShadowRecord::new("k", "newer", u64::MAX, ShadowMetadata::direct(None));
        f.shadows.upsert(&newer).await.unwrap();
        let sync = synchronizer(f.shadows.clone(), f.outbox.clone(), HybridSyncConfig::default());

        let result = sync.sync_set(KvWrite::new("k", "older")).await;
        assert_eq!(result.method, SyncMethod::Direct);
        assert_eq!(f.shadows.get("k").await.unwrap().unwrap().last_value, "newer");

        sync.sync_delete("k").await;
        assert!(f.shadows.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sync_stats() {
        let f = fixture();
        let sync = synchronizer(f.shadows.clone(), f.outbox.clone(), HybridSyncConfig::default());
        sync.sync_set(KvWrite::new("a", "1")).await;
        let event = OutboxEvent::key_mutated(&OutboxPayload::set("b", "2", None));
        f.outbox.append(&event).await.unwrap();

        let stats = sync.sync_stats().await.unwrap();
        assert_eq!(stats.configuration.direct_timeout_ms, 2000);
        assert_eq!(stats.configuration.pool_size, 10);
        assert_eq!(stats.pool.capacity, 10);
        assert_eq!(stats.pool.completed, 1);
        assert_eq!(stats.outbox_events.unprocessed, 1);
        assert_eq!(stats.outbox_events.total, 1);
        assert_eq!(stats.counters.direct, 1);
    }
}
