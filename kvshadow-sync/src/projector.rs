//! Outbox Projector
//!
//! Drains unprocessed outbox events into the shadow store in bounded,
//! oldest-first batches. Delivery is at-least-once, so applying an event
//! must be idempotent: the write sequence carried by each payload decides
//! whether the event still has anything to say about its key.

use chrono::Utc;
use kvshadow_core::{
    KvShadowResult, OutboxEvent, OutboxEventKind, ProjectionOutcome, ProjectionReport,
    ProjectorConfig, ShadowMetadata, ShadowRecord, ValidationError,
};
use kvshadow_storage::{OutboxStore, ShadowStore};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Applies outbox events to the shadow store.
pub struct OutboxProjector {
    outbox: Arc<dyn OutboxStore>,
    shadows: Arc<dyn ShadowStore>,
    config: ProjectorConfig,
    /// Held for the duration of a tick so ticks never overlap.
    tick_guard: Mutex<()>,
}

impl OutboxProjector {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        shadows: Arc<dyn ShadowStore>,
        config: ProjectorConfig,
    ) -> Self {
        Self {
            outbox,
            shadows,
            config,
            tick_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Run one tick: fetch up to `batch_size` unprocessed events, apply each
    /// one and mark it processed.
    ///
    /// Per-event failures are logged and counted; the event stays
    /// unprocessed and is retried on the next tick. Only a failure to fetch
    /// the batch is returned as an error.
    pub async fn run_once(&self) -> KvShadowResult<ProjectionReport> {
        let _tick = self.tick_guard.lock().await;
        let events = self.outbox.fetch_unprocessed(self.config.batch_size).await?;

        let mut report = ProjectionReport {
            fetched: events.len() as u64,
            ..Default::default()
        };
        for event in &events {
            match self.process(event).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        event_id = %event.id,
                        kind = %event.kind,
                        key = event.key().unwrap_or_default(),
                        error = %e,
                        "Failed to project outbox event"
                    );
                }
            }
        }

        if report.fetched > 0 {
            tracing::debug!(
                fetched = report.fetched,
                upserted = report.upserted,
                deleted = report.deleted,
                superseded = report.superseded,
                failed = report.failed,
                "Outbox projection tick completed"
            );
        }
        Ok(report)
    }

    /// Run ticks until a tick projects nothing new. Returns the summed report.
    ///
    /// Stops early when a whole tick fails, so a poisoned batch cannot spin.
    pub async fn drain(&self) -> KvShadowResult<ProjectionReport> {
        let mut total = ProjectionReport::default();
        loop {
            let tick = self.run_once().await?;
            total.fetched += tick.fetched;
            total.upserted += tick.upserted;
            total.deleted += tick.deleted;
            total.superseded += tick.superseded;
            total.already_applied += tick.already_applied;
            total.skipped_unknown += tick.skipped_unknown;
            total.failed += tick.failed;
            if tick.processed() == 0 {
                return Ok(total);
            }
        }
    }

    /// Apply one event and mark it processed.
    pub async fn process(&self, event: &OutboxEvent) -> KvShadowResult<ProjectionOutcome> {
        let outcome = self.apply(event).await?;
        self.outbox.mark_processed(event.id, Utc::now()).await?;
        Ok(outcome)
    }

    /// Apply one event to the shadow store without touching the outbox.
    ///
    /// Applying the same event twice leaves the shadow store as applying it
    /// once did.
    pub async fn apply(&self, event: &OutboxEvent) -> KvShadowResult<ProjectionOutcome> {
        if !matches!(event.kind, OutboxEventKind::KvMutated) {
            tracing::debug!(event_id = %event.id, kind = %event.kind, "Skipping unknown outbox event kind");
            return Ok(ProjectionOutcome::SkippedUnknownKind);
        }

        let payload = event
            .kv_payload()
            .map_err(|e| ValidationError::InvalidValue {
                field: "payload".to_string(),
                reason: e.to_string(),
            })?;
        if payload.key.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "payload.key".to_string(),
            }
            .into());
        }

        let existing = self.shadows.get(&payload.key).await?;
        let superseded = match (&existing, payload.write_seq) {
            (Some(record), Some(seq)) => record.write_seq > seq,
            _ => false,
        };

        let Some(record) = ShadowRecord::from_payload(
            &payload,
            payload.write_seq.unwrap_or(0),
            ShadowMetadata::queued(payload.fallback_reason, payload.ttl_secs),
        ) else {
            // Tombstone.
            return match existing {
                None => Ok(ProjectionOutcome::AlreadyApplied),
                Some(_) if superseded => Ok(ProjectionOutcome::Superseded),
                Some(_) => {
                    self.shadows.delete(&payload.key).await?;
                    Ok(ProjectionOutcome::Deleted)
                }
            };
        };

        if superseded {
            return Ok(ProjectionOutcome::Superseded);
        }
        if let Some(current) = &existing {
            let same_value = current.fingerprint == record.fingerprint;
            let same_write = match payload.write_seq {
                Some(seq) => current.write_seq == seq,
                None => true,
            };
            if same_value && same_write {
                return Ok(ProjectionOutcome::AlreadyApplied);
            }
        }

        self.shadows.upsert(&record).await?;
        Ok(ProjectionOutcome::Upserted)
    }
}
