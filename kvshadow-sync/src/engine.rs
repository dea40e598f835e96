//! Engine wiring: one place that builds every component over a cache and a
//! document store, and starts the background jobs.

use kvshadow_core::{KvShadowResult, SyncConfig, SyncError, WriteSequencer};
use kvshadow_storage::{
    CacheStore, DocumentOutboxStore, DocumentShadowStore, DocumentStore, OutboxStore, ShadowStore,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::hybrid::HybridSynchronizer;
use crate::jobs::{health_check_task, projector_task, HealthCheckMetrics, ProjectorJobMetrics};
use crate::persistence::MultiTierPersistence;
use crate::pool::WorkerPool;
use crate::projector::OutboxProjector;
use crate::verify::SyncVerifier;
use crate::write_path::KvWritePath;

/// Every engine component, sharing one sequencer and one worker pool.
pub struct SyncEngine {
    config: SyncConfig,
    cache: Arc<dyn CacheStore>,
    documents: Arc<dyn DocumentStore>,
    shadows: Arc<dyn ShadowStore>,
    outbox: Arc<dyn OutboxStore>,
    synchronizer: Arc<HybridSynchronizer>,
    projector: Arc<OutboxProjector>,
    verifier: Arc<SyncVerifier>,
    write_path: Arc<KvWritePath>,
    persistence: Arc<MultiTierPersistence>,
}

impl SyncEngine {
    /// Build the engine. Fails if `config` does not validate.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        documents: Arc<dyn DocumentStore>,
        config: SyncConfig,
    ) -> KvShadowResult<Self> {
        config.validate()?;

        let shadows: Arc<dyn ShadowStore> =
            Arc::new(DocumentShadowStore::new(Arc::clone(&documents)));
        let outbox: Arc<dyn OutboxStore> =
            Arc::new(DocumentOutboxStore::new(Arc::clone(&documents)));
        Ok(Self::with_stores(cache, documents, shadows, outbox, config))
    }

    /// Build the engine over explicit shadow and outbox repositories.
    ///
    /// The caller is responsible for validating `config`.
    pub fn with_stores(
        cache: Arc<dyn CacheStore>,
        documents: Arc<dyn DocumentStore>,
        shadows: Arc<dyn ShadowStore>,
        outbox: Arc<dyn OutboxStore>,
        config: SyncConfig,
    ) -> Self {
        let sequencer = Arc::new(WriteSequencer::new());
        let pool = WorkerPool::new(config.hybrid.pool_size);

        let synchronizer = Arc::new(HybridSynchronizer::new(
            Arc::clone(&shadows),
            Arc::clone(&outbox),
            pool,
            Arc::clone(&sequencer),
            config.hybrid.clone(),
        ));
        let projector = Arc::new(OutboxProjector::new(
            Arc::clone(&outbox),
            Arc::clone(&shadows),
            config.projector.clone(),
        ));
        let verifier = Arc::new(SyncVerifier::new(
            Arc::clone(&cache),
            Arc::clone(&shadows),
            Arc::clone(&outbox),
            sequencer,
            config.verification.clone(),
        ));
        let write_path = Arc::new(KvWritePath::new(
            Arc::clone(&cache),
            Arc::clone(&synchronizer),
            config.verification.clone(),
        ));
        let persistence = Arc::new(MultiTierPersistence::new(
            Arc::clone(&cache),
            Arc::clone(&documents),
            Arc::clone(&synchronizer),
        ));

        tracing::info!(
            pool_size = config.hybrid.pool_size,
            direct_timeout_ms = config.hybrid.direct_timeout.as_millis() as u64,
            batch_size = config.projector.batch_size,
            "Sync engine initialized"
        );

        Self {
            config,
            cache,
            documents,
            shadows,
            outbox,
            synchronizer,
            projector,
            verifier,
            write_path,
            persistence,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn shadows(&self) -> &Arc<dyn ShadowStore> {
        &self.shadows
    }

    pub fn outbox(&self) -> &Arc<dyn OutboxStore> {
        &self.outbox
    }

    pub fn synchronizer(&self) -> &Arc<HybridSynchronizer> {
        &self.synchronizer
    }

    pub fn projector(&self) -> &Arc<OutboxProjector> {
        &self.projector
    }

    pub fn verifier(&self) -> &Arc<SyncVerifier> {
        &self.verifier
    }

    pub fn write_path(&self) -> &Arc<KvWritePath> {
        &self.write_path
    }

    pub fn persistence(&self) -> &Arc<MultiTierPersistence> {
        &self.persistence
    }

    /// Start the projector and health-check loops on the current runtime.
    pub fn spawn_background(&self) -> BackgroundJobs {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let projector = tokio::spawn(projector_task(
            Arc::clone(&self.projector),
            shutdown_rx.clone(),
        ));
        let health_check = tokio::spawn(health_check_task(Arc::clone(&self.verifier), shutdown_rx));
        BackgroundJobs {
            shutdown_tx,
            projector,
            health_check,
        }
    }
}

/// Handle to the running background jobs.
pub struct BackgroundJobs {
    shutdown_tx: watch::Sender<bool>,
    projector: JoinHandle<Arc<ProjectorJobMetrics>>,
    health_check: JoinHandle<Arc<HealthCheckMetrics>>,
}

/// Final metrics of both jobs.
#[derive(Debug)]
pub struct BackgroundMetrics {
    pub projector: Arc<ProjectorJobMetrics>,
    pub health_check: Arc<HealthCheckMetrics>,
}

impl BackgroundJobs {
    /// Signal both jobs to stop and wait for them.
    pub async fn shutdown(self) -> KvShadowResult<BackgroundMetrics> {
        let _ = self.shutdown_tx.send(true);
        let projector = self.projector.await.map_err(join_failed("projector"))?;
        let health_check = self
            .health_check
            .await
            .map_err(join_failed("health_check"))?;
        Ok(BackgroundMetrics {
            projector,
            health_check,
        })
    }
}

fn join_failed(job: &'static str) -> impl Fn(tokio::task::JoinError) -> SyncError {
    move |e| SyncError::JobFailed {
        job: job.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvshadow_core::{HybridSyncConfig, KvShadowError, ProjectorConfig, SyncMethod};
    use kvshadow_storage::{InMemoryCacheStore, InMemoryDocumentStore};
    use std::time::Duration;

    use crate::hybrid::KvWrite;

    #[test]
    fn test_invalid_config_rejected() {
        let config =
            SyncConfig::default().with_hybrid(HybridSyncConfig::default().with_pool_size(0));
        let result = SyncEngine::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryDocumentStore::new()),
            config,
        );
        assert!(matches!(result, Err(KvShadowError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_jobs_drain_queued_writes() {
        let config = SyncConfig::default().with_projector(
            ProjectorConfig::default()
                .with_interval(Duration::from_millis(200))
                .with_initial_delay(Duration::from_millis(100)),
        );
        let engine = SyncEngine::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryDocumentStore::new()),
            config,
        )
        .unwrap();

        // Saturate the pool so the write is queued.
        let _held: Vec<_> = (0..8)
            .filter_map(|_| engine.synchronizer().pool().try_reserve())
            .collect();
        let outcome = engine
            .write_path()
            .set(KvWrite::new("k", "v"))
            .await
            .unwrap();
        assert_eq!(outcome.sync.method, SyncMethod::Queued);

        let jobs = engine.spawn_background();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(engine.verifier().verify_key_sync("k").await.unwrap().in_sync);

        let metrics = jobs.shutdown().await.unwrap();
        assert_eq!(metrics.projector.snapshot().events_processed, 1);
    }
}
