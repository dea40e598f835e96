//! Sync Health Check Background Task
//!
//! Runs a full sync verification on a fixed interval and logs a warning
//! whenever the verdict is not HEALTHY. Advisory only: it never repairs.

use kvshadow_core::HealthStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::ticker;
use crate::verify::SyncVerifier;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the health-check task.
#[derive(Debug, Default)]
pub struct HealthCheckMetrics {
    /// Checks run since startup
    pub checks: AtomicU64,

    /// Checks that came back degraded
    pub issues_detected: AtomicU64,

    /// Checks where verification itself failed
    pub check_errors: AtomicU64,
}

impl HealthCheckMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HealthCheckSnapshot {
        HealthCheckSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            issues_detected: self.issues_detected.load(Ordering::Relaxed),
            check_errors: self.check_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckSnapshot {
    pub checks: u64,
    pub issues_detected: u64,
    pub check_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Verify sync health every `health_check_interval` until shutdown.
pub async fn health_check_task(
    verifier: Arc<SyncVerifier>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<HealthCheckMetrics> {
    let metrics = Arc::new(HealthCheckMetrics::new());
    let config = verifier.config().clone();
    let mut tick = ticker(config.health_check_initial_delay, config.health_check_interval);

    tracing::info!(
        interval_secs = config.health_check_interval.as_secs(),
        stale_threshold_secs = config.stale_threshold.as_secs(),
        "Sync health check task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Sync health check task shutting down");
                    break;
                }
            }

            _ = tick.tick() => {
                run_check(&verifier, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        checks = snapshot.checks,
        issues_detected = snapshot.issues_detected,
        check_errors = snapshot.check_errors,
        "Sync health check task completed"
    );

    metrics
}

async fn run_check(verifier: &SyncVerifier, metrics: &HealthCheckMetrics) {
    metrics.checks.fetch_add(1, Ordering::Relaxed);

    let check = verifier.health_check().await;
    match check.status {
        HealthStatus::Healthy => {
            tracing::debug!(response_time_ms = check.response_time_ms, "Sync health check passed");
        }
        HealthStatus::Degraded => {
            metrics.issues_detected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                issues = check.message.as_deref().unwrap_or_default(),
                "Sync health check detected issues"
            );
        }
        HealthStatus::Unhealthy | HealthStatus::Unknown => {
            metrics.check_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = check.message.as_deref().unwrap_or_default(),
                "Sync health check could not run"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvshadow_core::{ShadowMetadata, ShadowRecord, VerificationConfig, WriteSequencer};
    use kvshadow_storage::{
        DocumentOutboxStore, DocumentShadowStore, InMemoryCacheStore, InMemoryDocumentStore,
        ShadowStore,
    };
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_health_check_task_counts_issues() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let shadows = Arc::new(DocumentShadowStore::new(Arc::clone(&docs)));
        let record = ShadowRecord::new("k", "v", 1, ShadowMetadata::direct(None));
        shadows.upsert(&record).await.unwrap();

        let config = VerificationConfig::default()
            .with_health_check_interval(Duration::from_secs(10))
            .with_health_check_initial_delay(Duration::from_secs(1));
        let verifier = Arc::new(SyncVerifier::new(
            Arc::new(InMemoryCacheStore::new()),
            shadows,
            Arc::new(DocumentOutboxStore::new(docs)),
            Arc::new(WriteSequencer::new()),
            config,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(health_check_task(verifier, shutdown_rx));
        tokio::time::sleep(Duration::from_secs(12)).await;

        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.checks, 2);
        assert_eq!(metrics.issues_detected, 2);
        assert_eq!(metrics.check_errors, 0);
    }
}
