//! Outbox Projector Background Task
//!
//! Runs [`OutboxProjector::run_once`] on a fixed interval, independent of
//! write volume. The first tick waits for the configured initial delay so
//! the rest of the system can finish starting. A tick that fails to fetch
//! its batch is logged and retried on the next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::ticker;
use crate::projector::OutboxProjector;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the projector task.
#[derive(Debug, Default)]
pub struct ProjectorJobMetrics {
    /// Ticks run since startup
    pub ticks: AtomicU64,

    /// Events marked processed (applied, superseded or skipped)
    pub events_processed: AtomicU64,

    /// Events that failed and were left for the next tick
    pub events_failed: AtomicU64,

    /// Ticks that could not fetch their batch
    pub tick_errors: AtomicU64,
}

impl ProjectorJobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProjectorJobSnapshot {
        ProjectorJobSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectorJobSnapshot {
    pub ticks: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub tick_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Drain the outbox every `interval` until the shutdown signal is received.
///
/// # Returns
///
/// Metrics collected during the task's lifetime
pub async fn projector_task(
    projector: Arc<OutboxProjector>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ProjectorJobMetrics> {
    let metrics = Arc::new(ProjectorJobMetrics::new());
    let config = projector.config().clone();
    let mut tick = ticker(config.initial_delay, config.interval);

    tracing::info!(
        interval_ms = config.interval.as_millis() as u64,
        initial_delay_ms = config.initial_delay.as_millis() as u64,
        batch_size = config.batch_size,
        "Outbox projector task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Outbox projector task shutting down");
                    break;
                }
            }

            _ = tick.tick() => {
                project_batch(&projector, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        ticks = snapshot.ticks,
        events_processed = snapshot.events_processed,
        events_failed = snapshot.events_failed,
        tick_errors = snapshot.tick_errors,
        "Outbox projector task completed"
    );

    metrics
}

async fn project_batch(projector: &OutboxProjector, metrics: &ProjectorJobMetrics) {
    metrics.ticks.fetch_add(1, Ordering::Relaxed);

    match projector.run_once().await {
        Ok(report) => {
            metrics
                .events_processed
                .fetch_add(report.processed(), Ordering::Relaxed);
            metrics
                .events_failed
                .fetch_add(report.failed, Ordering::Relaxed);
            if report.fetched == 0 {
                tracing::trace!("Outbox projector tick found no events");
            }
        }
        Err(e) => {
            metrics.tick_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Outbox projector tick failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvshadow_core::{OutboxEvent, OutboxPayload, ProjectorConfig};
    use kvshadow_storage::{
        DocumentOutboxStore, DocumentShadowStore, InMemoryDocumentStore, OutboxStore, ShadowStore,
    };
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_projector_task_drains_and_stops() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let shadows = Arc::new(DocumentShadowStore::new(Arc::clone(&docs)));
        let outbox = Arc::new(DocumentOutboxStore::new(docs));
        let config = ProjectorConfig::default()
            .with_interval(Duration::from_millis(100))
            .with_initial_delay(Duration::from_millis(500));
        let projector = Arc::new(OutboxProjector::new(outbox.clone(), shadows.clone(), config));

        let event = OutboxEvent::key_mutated(&OutboxPayload::set("k", "v", None));
        outbox.append(&event).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(projector_task(projector, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(shadows.get("k").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(shadows.get("k").await.unwrap().unwrap().last_value, "v");

        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();
        assert!(metrics.ticks >= 2);
        assert_eq!(metrics.events_processed, 1);
        assert_eq!(metrics.tick_errors, 0);
    }
}
