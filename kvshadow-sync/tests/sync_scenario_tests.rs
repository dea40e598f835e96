//! End-to-end scenarios for the sync engine over in-memory stores.
//!
//! Each test drives the public write path and checks what ends up in the
//! shadow store and the outbox, with faults injected through
//! [`TestHarness`].

use kvshadow_core::constants::OUTBOX_COLLECTION;
use kvshadow_core::{
    FallbackReason, HealthStatus, HybridSyncConfig, OutboxEvent, OutboxEventKind,
    ProjectionOutcome, ProjectorConfig, RepairAction, SyncConfig, SyncMethod, WriteSource,
};
use kvshadow_sync::KvWrite;
use kvshadow_test_utils::assertions::{assert_shadow_holds, assert_synced_via};
use kvshadow_test_utils::fixtures::{fast_config, queued_set, queued_tombstone, TestHarness};
use kvshadow_test_utils::{CacheStore, DocumentStore, OutboxStore, ShadowStore};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// DIRECT PATH
// ============================================================================

#[tokio::test]
async fn test_user_key_reaches_shadow_directly() {
    let h = TestHarness::new();
    let write = KvWrite::new("user:42", "alice")
        .with_ttl(3600)
        .with_session("s-1");

    let outcome = tokio::time::timeout(Duration::from_secs(3), h.engine.write_path().set(write))
        .await
        .expect("write should complete well within 3s")
        .unwrap();
    assert_synced_via(&outcome.sync, SyncMethod::Direct);

    let record = h.shadow("user:42").await;
    assert_shadow_holds(record.as_ref(), "alice");
    let record = record.unwrap();
    assert_eq!(record.session_id.as_deref(), Some("s-1"));
    assert_eq!(record.metadata.source, WriteSource::Direct);
    assert_eq!(h.outbox.appends(), 0);

    let status = h.engine.verifier().verify_key_sync("user:42").await.unwrap();
    assert!(status.in_sync);
    assert_eq!(status.shadow_value.as_deref(), Some("alice"));
    assert!(status.cache_exists && status.shadow_exists);
}

#[tokio::test]
async fn test_verify_sync_reports_clean_state() {
    let h = TestHarness::new();
    for i in 0..5 {
        h.engine
            .write_path()
            .set(KvWrite::new(format!("k:{}", i), "v"))
            .await
            .unwrap();
    }

    let report = h.engine.verifier().verify_sync().await.unwrap();
    assert!(report.overall.is_healthy());
    assert_eq!(report.comparison.checked_keys, 5);
    assert!(report.comparison.mismatches.is_empty());
    assert_eq!(report.unprocessed_outbox_events, 0);
    assert_eq!(report.staleness.stale_count, 0);

    let health = h.engine.verifier().health_check().await;
    assert_eq!(health.status, HealthStatus::Healthy);
}

// ============================================================================
// FALLBACK PATH
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_shadow_store_queues_exactly_one_event() {
    let config = fast_config().with_hybrid(
        HybridSyncConfig::default().with_direct_timeout(Duration::from_millis(100)),
    );
    let h = TestHarness::with_config(config);
    h.shadow_faults.set_delay(Some(Duration::from_secs(10)));

    let outcome = h
        .engine
        .write_path()
        .set(KvWrite::new("user:7", "bob"))
        .await
        .unwrap();
    assert_synced_via(&outcome.sync, SyncMethod::Queued);

    let events = h.unprocessed().await;
    assert_eq!(events.len(), 1);
    let payload = events[0].kv_payload().unwrap();
    assert_eq!(payload.key, "user:7");
    assert_eq!(payload.value.as_deref(), Some("bob"));
    assert_eq!(payload.fallback_reason, Some(FallbackReason::DirectTimeout));

    // The aborted direct write never lands, so only the projector writes.
    h.shadow_faults.set_delay(None);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(h.shadow("user:7").await.is_none());

    let report = h.engine.projector().drain().await.unwrap();
    assert_eq!(report.upserted, 1);
    let record = h.shadow("user:7").await.unwrap();
    assert_eq!(record.metadata.source, WriteSource::Queued);
    assert_eq!(
        record.metadata.fallback_reason,
        Some(FallbackReason::DirectTimeout)
    );
    assert!(h.engine.verifier().verify_key_sync("user:7").await.unwrap().in_sync);
}

#[tokio::test]
async fn test_unavailable_shadow_and_outbox_reports_both_failed() {
    let h = TestHarness::new();
    h.shadow_faults.set_failing(true);
    h.outbox_faults.set_failing(true);

    let outcome = h
        .engine
        .write_path()
        .set(KvWrite::new("k", "v"))
        .await
        .unwrap();
    assert!(outcome.ok);
    assert_synced_via(&outcome.sync, SyncMethod::BothFailed);
    assert_eq!(
        h.engine.cache().get("k").await.unwrap().as_deref(),
        Some("v")
    );
    assert_eq!(h.engine.synchronizer().metrics().snapshot().both_failed, 1);
}

// ============================================================================
// LOAD BRANCHING
// ============================================================================

#[tokio::test]
async fn test_saturated_pool_goes_straight_to_outbox() {
    let h = TestHarness::new();
    let _held = h.saturate(8);

    let outcome = h
        .engine
        .write_path()
        .set(KvWrite::new("k", "v"))
        .await
        .unwrap();
    assert_synced_via(&outcome.sync, SyncMethod::Queued);
    assert_eq!(h.shadows.writes(), 0);

    let events = h.unprocessed().await;
    assert_eq!(
        events[0].kv_payload().unwrap().fallback_reason,
        Some(FallbackReason::HighLoad)
    );
}

#[tokio::test]
async fn test_light_load_uses_direct_path() {
    let h = TestHarness::new();
    let _held = h.saturate(7);

    let assessment = h.engine.synchronizer().assess_load().await;
    assert!(!assessment.high_load);
    assert_eq!(assessment.pool.active, 7);

    let outcome = h
        .engine
        .write_path()
        .set(KvWrite::new("k", "v"))
        .await
        .unwrap();
    assert_synced_via(&outcome.sync, SyncMethod::Direct);
}

#[tokio::test]
async fn test_concurrent_writers_on_idle_pool_both_go_direct() {
    let h = TestHarness::new();
    let write_path = h.engine.write_path();

    let (a, b) = tokio::join!(
        write_path.set(KvWrite::new("a", "1")),
        write_path.set(KvWrite::new("b", "2")),
    );
    assert_synced_via(&a.unwrap().sync, SyncMethod::Direct);
    assert_synced_via(&b.unwrap().sync, SyncMethod::Direct);

    let counters = h.engine.synchronizer().metrics().snapshot();
    assert_eq!(counters.high_load_skips, 0);
    assert_eq!(h.outbox.appends(), 0);
    assert_shadow_holds(h.shadow("a").await.as_ref(), "1");
    assert_shadow_holds(h.shadow("b").await.as_ref(), "2");
}

#[tokio::test]
async fn test_event_backlog_counts_as_high_load() {
    let config = fast_config()
        .with_hybrid(HybridSyncConfig::default().with_event_backlog_threshold(3));
    let h = TestHarness::with_config(config);
    for i in 0..4 {
        h.engine
            .outbox()
            .append(&queued_set(&format!("old:{}", i), "v", 0))
            .await
            .unwrap();
    }

    let assessment = h.engine.synchronizer().assess_load().await;
    assert!(assessment.event_backlog);
    assert_eq!(assessment.unprocessed_events, Some(4));

    let outcome = h
        .engine
        .write_path()
        .set(KvWrite::new("k", "v"))
        .await
        .unwrap();
    assert_synced_via(&outcome.sync, SyncMethod::Queued);
}

// ============================================================================
// PROJECTION
// ============================================================================

#[tokio::test]
async fn test_projection_is_idempotent() {
    let h = TestHarness::new();
    let event = queued_set("k", "v", 5);
    h.engine.outbox().append(&event).await.unwrap();

    let projector = h.engine.projector();
    assert_eq!(projector.apply(&event).await.unwrap(), ProjectionOutcome::Upserted);
    let first = h.shadow("k").await.unwrap();

    assert_eq!(
        projector.apply(&event).await.unwrap(),
        ProjectionOutcome::AlreadyApplied
    );
    let report = projector.drain().await.unwrap();
    assert_eq!(report.already_applied, 1);

    let second = h.shadow("k").await.unwrap();
    assert_eq!(first.last_value, second.last_value);
    assert_eq!(first.write_seq, second.write_seq);
    assert_eq!(h.engine.outbox().count_unprocessed().await.unwrap(), 0);
}

#[tokio::test]
async fn test_queued_tombstone_removes_shadow() {
    let h = TestHarness::new();
    h.engine
        .write_path()
        .set(KvWrite::new("k", "v"))
        .await
        .unwrap();
    assert!(h.shadow("k").await.is_some());

    h.shadow_faults.set_failing(true);
    let outcome = h.engine.write_path().delete("k").await.unwrap();
    assert!(outcome.ok);
    assert_synced_via(&outcome.sync, SyncMethod::Queued);
    assert!(h.unprocessed().await[0].kv_payload().unwrap().is_tombstone());

    h.shadow_faults.set_failing(false);
    let report = h.engine.projector().drain().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert!(h.shadow("k").await.is_none());

    let status = h.engine.verifier().verify_key_sync("k").await.unwrap();
    assert!(!status.cache_exists && !status.shadow_exists);
    assert!(status.in_sync);
}

#[tokio::test]
async fn test_stale_events_do_not_overwrite_newer_writes() {
    let h = TestHarness::new();
    let outcome = h
        .engine
        .write_path()
        .set(KvWrite::new("k", "new"))
        .await
        .unwrap();
    assert_synced_via(&outcome.sync, SyncMethod::Direct);
    let current = h.shadow("k").await.unwrap().write_seq;

    h.engine
        .outbox()
        .append(&queued_set("k", "old", current - 1))
        .await
        .unwrap();
    h.engine
        .outbox()
        .append(&queued_tombstone("k", current - 1))
        .await
        .unwrap();

    let report = h.engine.projector().drain().await.unwrap();
    assert_eq!(report.superseded, 2);
    assert_eq!(h.shadow("k").await.unwrap().last_value, "new");
}

#[tokio::test]
async fn test_tick_is_bounded_by_batch_size() {
    let config = fast_config()
        .with_projector(ProjectorConfig::default().with_batch_size(50));
    let h = TestHarness::with_config(config);
    for i in 0..120u64 {
        h.engine
            .outbox()
            .append(&queued_set(&format!("k:{:03}", i), "v", i + 1))
            .await
            .unwrap();
    }

    let first = h.engine.projector().run_once().await.unwrap();
    assert_eq!(first.fetched, 50);
    assert_eq!(h.engine.outbox().count_unprocessed().await.unwrap(), 70);

    let rest = h.engine.projector().drain().await.unwrap();
    assert_eq!(rest.upserted, 70);
    assert_eq!(h.engine.outbox().count_unprocessed().await.unwrap(), 0);
    assert_eq!(h.engine.shadows().count().await.unwrap(), 120);
}

#[tokio::test]
async fn test_undecodable_events_do_not_starve_the_batch() {
    let config = fast_config()
        .with_projector(ProjectorConfig::default().with_batch_size(2));
    let h = TestHarness::with_config(config);
    for id in ["broken-1", "broken-2"] {
        h.documents
            .insert(
                OUTBOX_COLLECTION,
                id,
                json!({ "type": "KVMutated", "ts": "2020-01-01T00:00:00Z", "processed": false, "payload": {} }),
            )
            .await
            .unwrap();
    }
    h.engine
        .outbox()
        .append(&queued_set("good", "v", 1))
        .await
        .unwrap();

    let report = h.engine.projector().run_once().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.upserted, 1);
    assert_shadow_holds(h.shadow("good").await.as_ref(), "v");
    assert_eq!(h.engine.outbox().count_unprocessed().await.unwrap(), 2);
}

#[tokio::test]
async fn test_legacy_and_non_positive_ttl_payloads_project() {
    let h = TestHarness::new();
    let legacy = OutboxEvent::with_raw_payload(
        OutboxEventKind::KvMutated,
        json!({
            "key": "user:9",
            "value": "carol",
            "ttlSec": 0,
            "sessionId": "",
            "interactionId": "",
            "fallbackReason": "ASYNC_TIMEOUT_OR_FAILURE"
        }),
    );
    let negative_ttl = OutboxEvent::with_raw_payload(
        OutboxEventKind::KvMutated,
        json!({ "key": "user:10", "value": "dave", "ttlSec": -1 }),
    );
    h.engine.outbox().append(&legacy).await.unwrap();
    h.engine.outbox().append(&negative_ttl).await.unwrap();

    let report = h.engine.projector().drain().await.unwrap();
    assert_eq!(report.upserted, 2);
    assert_eq!(report.failed, 0);
    assert!(h.unprocessed().await.is_empty());

    let record = h.shadow("user:9").await.unwrap();
    assert_eq!(record.last_value, "carol");
    assert_eq!(record.session_id, None);
    assert_eq!(record.metadata.ttl_secs, None);
    assert_eq!(
        record.metadata.fallback_reason,
        Some(FallbackReason::DirectFailed)
    );
    assert_eq!(h.shadow("user:10").await.unwrap().metadata.ttl_secs, None);
}

// ============================================================================
// REPAIR
// ============================================================================

#[tokio::test]
async fn test_repair_converges_each_drift_case() {
    let h = TestHarness::new();
    let cache = h.engine.cache();
    let verifier = h.engine.verifier();

    // Cache only.
    cache.set("a", "1", None).await.unwrap();
    let outcome = verifier.force_sync_repair("a").await;
    assert_eq!(outcome.action, RepairAction::CreatedShadow);
    assert_shadow_holds(h.shadow("a").await.as_ref(), "1");

    // Values differ.
    cache.set("a", "2", None).await.unwrap();
    assert!(!verifier.verify_key_sync("a").await.unwrap().in_sync);
    let outcome = verifier.force_sync_repair("a").await;
    assert_eq!(outcome.action, RepairAction::UpdatedShadow);
    let record = h.shadow("a").await.unwrap();
    assert_eq!(record.last_value, "2");
    assert!(record.metadata.repaired);

    // Shadow only.
    cache.delete("a").await.unwrap();
    let outcome = verifier.force_sync_repair("a").await;
    assert_eq!(outcome.action, RepairAction::RemovedShadow);
    assert!(h.shadow("a").await.is_none());

    // Converged.
    let outcome = verifier.force_sync_repair("a").await;
    assert_eq!(outcome.action, RepairAction::NoRepairNeeded);
    assert!(outcome.success);
}

#[tokio::test]
async fn test_repair_outranks_pending_events() {
    let h = TestHarness::new();
    let _held = h.saturate(8);
    h.engine
        .write_path()
        .set(KvWrite::new("k", "fresh"))
        .await
        .unwrap();
    h.engine.cache().set("k", "fresher", None).await.unwrap();

    let outcome = h.engine.verifier().force_sync_repair("k").await;
    assert_eq!(outcome.action, RepairAction::CreatedShadow);

    // The queued event carries an older sequence than the repair.
    let report = h.engine.projector().drain().await.unwrap();
    assert_eq!(report.superseded, 1);
    assert_eq!(h.shadow("k").await.unwrap().last_value, "fresher");
}

#[tokio::test]
async fn test_repair_failure_is_reported() {
    let h = TestHarness::new();
    h.cache_faults.set_failing(true);
    let outcome = h.engine.verifier().force_sync_repair("k").await;
    assert!(!outcome.success);
    assert_eq!(outcome.action, RepairAction::RepairFailed);
    assert!(outcome.error.is_some());
}

// ============================================================================
// BACKGROUND JOBS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_background_projector_catches_up() {
    let h = TestHarness::with_config(fast_config());
    h.shadow_faults.set_failing(true);
    for i in 0..3 {
        h.engine
            .write_path()
            .set(KvWrite::new(format!("k:{}", i), "v"))
            .await
            .unwrap();
    }
    assert_eq!(h.unprocessed().await.len(), 3);
    h.shadow_faults.set_failing(false);

    let jobs = h.engine.spawn_background();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(h.unprocessed().await.is_empty());
    let report = h.engine.verifier().verify_sync().await.unwrap();
    assert!(report.overall.is_healthy());

    let metrics = jobs.shutdown().await.unwrap();
    assert_eq!(metrics.projector.snapshot().events_processed, 3);
}

#[test]
fn test_default_engine_config_is_valid() {
    assert!(SyncConfig::default().validate().is_ok());
    assert!(fast_config().validate().is_ok());
}
