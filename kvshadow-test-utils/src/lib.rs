//! kvshadow Test Utilities
//!
//! Shared test infrastructure for the kvshadow workspace:
//! - Fault-injecting and counting wrappers around the storage boundaries
//! - Proptest generators for keys, payloads, events and shadow records
//! - A fully wired in-memory engine harness
//! - Custom assertions for kvshadow error kinds

// Re-export core types for convenience
pub use kvshadow_core::{
    compute_fingerprint, ConfigError, EventId, FallbackReason, HybridSyncConfig, KvShadowError,
    KvShadowResult, OutboxEvent, OutboxEventKind, OutboxPayload, ProjectorConfig, ShadowMetadata,
    ShadowRecord, StorageError, SyncConfig, SyncError, SyncMethod, Timestamp, ValidationError,
    VerificationConfig, WriteSource,
};
pub use kvshadow_storage::{
    CacheStore, DocumentOutboxStore, DocumentShadowStore, DocumentStore, InMemoryCacheStore,
    InMemoryDocumentStore, OutboxStore, ShadowPage, ShadowStore,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Shared switches for the faulty wrappers.
///
/// A delay applies before every call. Failing makes every call return
/// [`StorageError::Unavailable`] after the delay.
#[derive(Debug, Default)]
struct FaultSwitch {
    failing: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicU64,
}

impl FaultSwitch {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Option<Duration>) {
        let ms = delay.map(|d| d.as_millis() as u64).unwrap_or(0);
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    async fn enter(&self, store: &str, op: &str) -> KvShadowResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                store: store.to_string(),
                reason: format!("injected failure in {}", op),
            }
            .into());
        }
        Ok(())
    }
}

macro_rules! fault_switches {
    ($ty:ident) => {
        impl $ty {
            /// Make every subsequent call fail (or stop failing).
            pub fn set_failing(&self, failing: bool) {
                self.switch.set_failing(failing);
            }

            /// Delay every subsequent call. `None` removes the delay.
            pub fn set_delay(&self, delay: Option<Duration>) {
                self.switch.set_delay(delay);
            }

            /// Number of calls made through the wrapper, failed ones included.
            pub fn calls(&self) -> u64 {
                self.switch.calls.load(Ordering::SeqCst)
            }
        }
    };
}

/// Shadow store wrapper that can be made slow or unavailable.
pub struct FaultyShadowStore {
    inner: Arc<dyn ShadowStore>,
    switch: FaultSwitch,
}

impl FaultyShadowStore {
    pub fn new(inner: Arc<dyn ShadowStore>) -> Self {
        Self {
            inner,
            switch: FaultSwitch::default(),
        }
    }
}

fault_switches!(FaultyShadowStore);

#[async_trait]
impl ShadowStore for FaultyShadowStore {
    async fn get(&self, key: &str) -> KvShadowResult<Option<ShadowRecord>> {
        self.switch.enter("shadow", "get").await?;
        self.inner.get(key).await
    }

    async fn upsert(&self, record: &ShadowRecord) -> KvShadowResult<()> {
        self.switch.enter("shadow", "upsert").await?;
        self.inner.upsert(record).await
    }

    async fn delete(&self, key: &str) -> KvShadowResult<bool> {
        self.switch.enter("shadow", "delete").await?;
        self.inner.delete(key).await
    }

    async fn scan_page(&self, after_key: Option<&str>, limit: usize) -> KvShadowResult<ShadowPage> {
        self.switch.enter("shadow", "scan_page").await?;
        self.inner.scan_page(after_key, limit).await
    }

    async fn count(&self) -> KvShadowResult<u64> {
        self.switch.enter("shadow", "count").await?;
        self.inner.count().await
    }
}

/// Outbox wrapper that can be made slow or unavailable.
pub struct FaultyOutboxStore {
    inner: Arc<dyn OutboxStore>,
    switch: FaultSwitch,
}

impl FaultyOutboxStore {
    pub fn new(inner: Arc<dyn OutboxStore>) -> Self {
        Self {
            inner,
            switch: FaultSwitch::default(),
        }
    }
}

fault_switches!(FaultyOutboxStore);

#[async_trait]
impl OutboxStore for FaultyOutboxStore {
    async fn append(&self, event: &OutboxEvent) -> KvShadowResult<()> {
        self.switch.enter("outbox", "append").await?;
        self.inner.append(event).await
    }

    async fn get(&self, id: EventId) -> KvShadowResult<Option<OutboxEvent>> {
        self.switch.enter("outbox", "get").await?;
        self.inner.get(id).await
    }

    async fn fetch_unprocessed(&self, limit: usize) -> KvShadowResult<Vec<OutboxEvent>> {
        self.switch.enter("outbox", "fetch_unprocessed").await?;
        self.inner.fetch_unprocessed(limit).await
    }

    async fn mark_processed(&self, id: EventId, at: Timestamp) -> KvShadowResult<()> {
        self.switch.enter("outbox", "mark_processed").await?;
        self.inner.mark_processed(id, at).await
    }

    async fn count_unprocessed(&self) -> KvShadowResult<u64> {
        self.switch.enter("outbox", "count_unprocessed").await?;
        self.inner.count_unprocessed().await
    }

    async fn count_total(&self) -> KvShadowResult<u64> {
        self.switch.enter("outbox", "count_total").await?;
        self.inner.count_total().await
    }
}

/// Cache wrapper that can be made slow or unavailable.
pub struct FaultyCacheStore {
    inner: Arc<dyn CacheStore>,
    switch: FaultSwitch,
}

impl FaultyCacheStore {
    pub fn new(inner: Arc<dyn CacheStore>) -> Self {
        Self {
            inner,
            switch: FaultSwitch::default(),
        }
    }
}

fault_switches!(FaultyCacheStore);

#[async_trait]
impl CacheStore for FaultyCacheStore {
    async fn get(&self, key: &str) -> KvShadowResult<Option<String>> {
        self.switch.enter("cache", "get").await?;
        self.inner.get(key).await
    }

    async fn mget(&self, keys: &[String]) -> KvShadowResult<HashMap<String, String>> {
        self.switch.enter("cache", "mget").await?;
        self.inner.mget(keys).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KvShadowResult<()> {
        self.switch.enter("cache", "set").await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> KvShadowResult<bool> {
        self.switch.enter("cache", "delete").await?;
        self.inner.delete(key).await
    }

    async fn ttl(&self, key: &str) -> KvShadowResult<Option<Duration>> {
        self.switch.enter("cache", "ttl").await?;
        self.inner.ttl(key).await
    }

    async fn scan(&self, prefix: &str, limit: usize) -> KvShadowResult<Vec<String>> {
        self.switch.enter("cache", "scan").await?;
        self.inner.scan(prefix, limit).await
    }
}

// ============================================================================
// CALL COUNTING
// ============================================================================

/// Shadow store wrapper that counts reads and writes.
pub struct CountingShadowStore {
    inner: Arc<dyn ShadowStore>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl CountingShadowStore {
    pub fn new(inner: Arc<dyn ShadowStore>) -> Self {
        Self {
            inner,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Upserts and deletes attempted.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Gets, page scans and counts attempted.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShadowStore for CountingShadowStore {
    async fn get(&self, key: &str) -> KvShadowResult<Option<ShadowRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn upsert(&self, record: &ShadowRecord) -> KvShadowResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(record).await
    }

    async fn delete(&self, key: &str) -> KvShadowResult<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn scan_page(&self, after_key: Option<&str>, limit: usize) -> KvShadowResult<ShadowPage> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.scan_page(after_key, limit).await
    }

    async fn count(&self) -> KvShadowResult<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.count().await
    }
}

/// Outbox wrapper that counts appends.
pub struct CountingOutboxStore {
    inner: Arc<dyn OutboxStore>,
    appends: AtomicU64,
}

impl CountingOutboxStore {
    pub fn new(inner: Arc<dyn OutboxStore>) -> Self {
        Self {
            inner,
            appends: AtomicU64::new(0),
        }
    }

    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboxStore for CountingOutboxStore {
    async fn append(&self, event: &OutboxEvent) -> KvShadowResult<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.inner.append(event).await
    }

    async fn get(&self, id: EventId) -> KvShadowResult<Option<OutboxEvent>> {
        self.inner.get(id).await
    }

    async fn fetch_unprocessed(&self, limit: usize) -> KvShadowResult<Vec<OutboxEvent>> {
        self.inner.fetch_unprocessed(limit).await
    }

    async fn mark_processed(&self, id: EventId, at: Timestamp) -> KvShadowResult<()> {
        self.inner.mark_processed(id, at).await
    }

    async fn count_unprocessed(&self) -> KvShadowResult<u64> {
        self.inner.count_unprocessed().await
    }

    async fn count_total(&self) -> KvShadowResult<u64> {
        self.inner.count_total().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for kvshadow types.

    use super::*;
    use proptest::prelude::*;

    /// Cache keys of the form `namespace:id`.
    pub fn arb_key() -> impl Strategy<Value = String> {
        ("[a-z]{1,8}", "[a-z0-9]{1,12}").prop_map(|(ns, id)| format!("{}:{}", ns, id))
    }

    /// Arbitrary printable values, empty included.
    pub fn arb_value() -> impl Strategy<Value = String> {
        "[ -~]{0,64}"
    }

    /// Raw TTL input, including the non-positive values that mean "no expiry".
    pub fn arb_ttl_secs() -> impl Strategy<Value = Option<i64>> {
        prop_oneof![
            Just(None),
            (-10i64..=0).prop_map(Some),
            (1i64..86_400).prop_map(Some),
        ]
    }

    pub fn arb_fallback_reason() -> impl Strategy<Value = FallbackReason> {
        prop_oneof![
            Just(FallbackReason::DirectTimeout),
            Just(FallbackReason::DirectFailed),
            Just(FallbackReason::HighLoad),
        ]
    }

    pub fn arb_correlation_id() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[a-f0-9]{8}")
    }

    /// Set payloads, sequenced or not.
    pub fn arb_set_payload() -> impl Strategy<Value = OutboxPayload> {
        (
            arb_key(),
            arb_value(),
            arb_ttl_secs(),
            arb_correlation_id(),
            proptest::option::of(arb_fallback_reason()),
            proptest::option::of(1u64..1_000_000),
        )
            .prop_map(|(key, value, ttl, session, reason, seq)| {
                let mut payload = OutboxPayload::set(key, value, ttl).with_session(session);
                payload.fallback_reason = reason;
                payload.write_seq = seq;
                payload
            })
    }

    pub fn arb_tombstone() -> impl Strategy<Value = OutboxPayload> {
        (arb_key(), proptest::option::of(1u64..1_000_000)).prop_map(|(key, seq)| {
            let mut payload = OutboxPayload::tombstone(key);
            payload.write_seq = seq;
            payload
        })
    }

    /// Set payloads three times as often as tombstones.
    pub fn arb_payload() -> impl Strategy<Value = OutboxPayload> {
        prop_oneof![3 => arb_set_payload(), 1 => arb_tombstone()]
    }

    pub fn arb_kv_event() -> impl Strategy<Value = OutboxEvent> {
        arb_payload().prop_map(|p| OutboxEvent::key_mutated(&p))
    }

    /// Events of a kind this build does not project.
    pub fn arb_unknown_event() -> impl Strategy<Value = OutboxEvent> {
        ("[A-Z][a-zA-Z]{3,12}", arb_key())
            .prop_filter("must not collide with the known tag", |(tag, _)| {
                tag != kvshadow_core::outbox::KV_MUTATED_TAG
            })
            .prop_map(|(tag, key)| {
                OutboxEvent::with_raw_payload(
                    OutboxEventKind::Unknown(tag),
                    serde_json::json!({ "key": key }),
                )
            })
    }

    pub fn arb_write_source() -> impl Strategy<Value = WriteSource> {
        prop_oneof![
            Just(WriteSource::Direct),
            Just(WriteSource::Queued),
            Just(WriteSource::Repair),
        ]
    }

    pub fn arb_metadata() -> impl Strategy<Value = ShadowMetadata> {
        (
            arb_write_source(),
            proptest::option::of(arb_fallback_reason()),
            proptest::option::of(1u64..86_400),
        )
            .prop_map(|(source, reason, ttl)| {
                let mut metadata = ShadowMetadata::new(source);
                metadata.fallback_reason = reason;
                metadata.ttl_secs = ttl;
                metadata.repaired = source == WriteSource::Repair;
                metadata
            })
    }

    pub fn arb_shadow_record() -> impl Strategy<Value = ShadowRecord> {
        (
            arb_key(),
            arb_value(),
            0u64..1_000_000,
            arb_metadata(),
            arb_correlation_id(),
            arb_correlation_id(),
        )
            .prop_map(|(key, value, seq, metadata, session, interaction)| {
                ShadowRecord::new(key, value, seq, metadata).with_correlation(session, interaction)
            })
    }

    /// A sequence of writes against a small key space, so keys repeat.
    pub fn arb_write_batch(max: usize) -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(("k[0-4]", arb_value()), 1..max.max(2))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores and a wired engine for scenario tests.

    use super::*;
    use kvshadow_sync::SyncEngine;

    /// Config with short projector and health-check intervals.
    pub fn fast_config() -> SyncConfig {
        SyncConfig::default()
            .with_projector(
                ProjectorConfig::default()
                    .with_interval(Duration::from_millis(200))
                    .with_initial_delay(Duration::from_millis(100)),
            )
            .with_verification(
                VerificationConfig::default()
                    .with_health_check_interval(Duration::from_secs(60))
                    .with_health_check_initial_delay(Duration::from_secs(60)),
            )
    }

    /// In-memory engine whose stores sit behind fault and counting wrappers.
    ///
    /// Layering: in-memory document store, then a faulty wrapper, then a
    /// counting wrapper, then the engine. Faults therefore still count as
    /// attempts.
    pub struct TestHarness {
        pub cache: Arc<InMemoryCacheStore>,
        pub documents: Arc<InMemoryDocumentStore>,
        pub cache_faults: Arc<FaultyCacheStore>,
        pub shadow_faults: Arc<FaultyShadowStore>,
        pub outbox_faults: Arc<FaultyOutboxStore>,
        pub shadows: Arc<CountingShadowStore>,
        pub outbox: Arc<CountingOutboxStore>,
        pub engine: SyncEngine,
    }

    impl TestHarness {
        pub fn new() -> Self {
            Self::with_config(fast_config())
        }

        pub fn with_config(config: SyncConfig) -> Self {
            let cache = Arc::new(InMemoryCacheStore::new());
            let documents = Arc::new(InMemoryDocumentStore::new());

            let cache_faults = Arc::new(FaultyCacheStore::new(cache.clone()));
            let shadow_faults = Arc::new(FaultyShadowStore::new(Arc::new(
                DocumentShadowStore::new(documents.clone()),
            )));
            let outbox_faults = Arc::new(FaultyOutboxStore::new(Arc::new(
                DocumentOutboxStore::new(documents.clone()),
            )));
            let shadows = Arc::new(CountingShadowStore::new(shadow_faults.clone()));
            let outbox = Arc::new(CountingOutboxStore::new(outbox_faults.clone()));

            let engine = SyncEngine::with_stores(
                cache_faults.clone(),
                documents.clone(),
                shadows.clone(),
                outbox.clone(),
                config,
            );

            Self {
                cache,
                documents,
                cache_faults,
                shadow_faults,
                outbox_faults,
                shadows,
                outbox,
                engine,
            }
        }

        /// Hold `n` worker slots until the returned guards drop.
        pub fn saturate(&self, n: usize) -> Vec<kvshadow_sync::PoolSlot> {
            (0..n)
                .filter_map(|_| self.engine.synchronizer().pool().try_reserve())
                .collect()
        }

        /// Shadow record for `key`, read past the fault wrapper.
        pub async fn shadow(&self, key: &str) -> Option<ShadowRecord> {
            DocumentShadowStore::new(self.documents.clone())
                .get(key)
                .await
                .ok()
                .flatten()
        }

        pub async fn unprocessed(&self) -> Vec<OutboxEvent> {
            DocumentOutboxStore::new(self.documents.clone())
                .fetch_unprocessed(usize::MAX)
                .await
                .unwrap_or_default()
        }
    }

    impl Default for TestHarness {
        fn default() -> Self {
            Self::new()
        }
    }

    /// A record as the direct path would write it.
    pub fn direct_record(key: &str, value: &str, write_seq: u64) -> ShadowRecord {
        ShadowRecord::new(key, value, write_seq, ShadowMetadata::direct(None))
    }

    /// A sequenced set event as the fallback path would enqueue it.
    pub fn queued_set(key: &str, value: &str, write_seq: u64) -> OutboxEvent {
        OutboxEvent::key_mutated(
            &OutboxPayload::set(key, value, None)
                .with_fallback_reason(FallbackReason::DirectTimeout)
                .with_write_seq(write_seq),
        )
    }

    pub fn queued_tombstone(key: &str, write_seq: u64) -> OutboxEvent {
        OutboxEvent::key_mutated(
            &OutboxPayload::tombstone(key)
                .with_fallback_reason(FallbackReason::DirectFailed)
                .with_write_seq(write_seq),
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for kvshadow error kinds and sync outcomes.

    use super::*;
    use kvshadow_core::SyncResult;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &KvShadowResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &KvShadowResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &KvShadowResult<T>) {
        match result {
            Err(KvShadowError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &KvShadowResult<T>) {
        match result {
            Err(KvShadowError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &KvShadowResult<T>) {
        match result {
            Err(KvShadowError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert a sync outcome took the given path.
    #[track_caller]
    pub fn assert_synced_via(result: &SyncResult, method: SyncMethod) {
        assert_eq!(
            result.method, method,
            "Expected {:?}, got {:?}: {}",
            method, result.method, result.message
        );
        assert_eq!(result.success, method != SyncMethod::BothFailed);
    }

    /// Assert that `record` holds `value` with a fingerprint computed from it.
    #[track_caller]
    pub fn assert_shadow_holds(record: Option<&ShadowRecord>, value: &str) {
        let record = record.unwrap_or_else(|| panic!("Expected shadow record holding {:?}", value));
        assert_eq!(record.last_value, value);
        assert_eq!(record.fingerprint, compute_fingerprint(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_faulty_store_toggles() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let faulty = FaultyShadowStore::new(Arc::new(DocumentShadowStore::new(docs)));
        assert!(faulty.count().await.is_ok());

        faulty.set_failing(true);
        assert!(matches!(
            faulty.count().await,
            Err(KvShadowError::Storage(StorageError::Unavailable { .. }))
        ));

        faulty.set_failing(false);
        assert!(faulty.count().await.is_ok());
        assert_eq!(faulty.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faulty_store_delay() {
        let faulty = FaultyCacheStore::new(Arc::new(InMemoryCacheStore::new()));
        faulty.set_delay(Some(Duration::from_secs(5)));
        let start = tokio::time::Instant::now();
        faulty.get("k").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_counting_store() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let counting = CountingShadowStore::new(Arc::new(DocumentShadowStore::new(docs)));
        counting
            .upsert(&fixtures::direct_record("k", "v", 1))
            .await
            .unwrap();
        counting.get("k").await.unwrap();
        counting.delete("k").await.unwrap();
        assert_eq!(counting.writes(), 2);
        assert_eq!(counting.reads(), 1);
    }
}
