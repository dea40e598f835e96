//! kvshadow Sync - the consistency engine
//!
//! Keeps a durable shadow record of every cache write:
//!
//! - [`HybridSynchronizer`]: per-write direct shadow update with an outbox
//!   fallback, load-aware
//! - [`OutboxProjector`]: drains the outbox into the shadow store
//! - [`SyncVerifier`]: drift detection between cache and shadow, and
//!   single-key repair
//! - [`KvWritePath`] and [`MultiTierPersistence`]: callers that mutate the
//!   cache and hand each mutation to the synchronizer
//! - [`SyncEngine`]: wires all of the above over a cache and a document store
//!
//! # Example
//!
//! ```ignore
//! use kvshadow_sync::{KvWrite, SyncEngine};
//!
//! let engine = SyncEngine::new(cache, documents, SyncConfig::from_env()?)?;
//! let jobs = engine.spawn_background();
//!
//! let outcome = engine
//!     .write_path()
//!     .set(KvWrite::new("user:42", "alice").with_ttl(3600).with_session("s1"))
//!     .await?;
//! assert!(outcome.sync.success);
//!
//! jobs.shutdown().await?;
//! ```

pub mod engine;
pub mod hybrid;
pub mod jobs;
pub mod persistence;
pub mod pool;
pub mod projector;
pub mod telemetry;
pub mod verify;
pub mod write_path;

pub use engine::{BackgroundJobs, BackgroundMetrics, SyncEngine};
pub use hybrid::{HybridSynchronizer, KvWrite, SyncMetrics};
pub use persistence::{
    interaction_cache_strategies, recommend_strategies, session_cache_strategies,
    EvaluationTarget, InteractionCacheStrategy, MultiTierPersistence, PersistenceResult,
    SessionCacheStrategy, StrategyInfo, StrategyRecommendation,
};
pub use pool::{PoolSlot, WorkerPool};
pub use projector::OutboxProjector;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use verify::SyncVerifier;
pub use write_path::{KvWriteOutcome, KvWritePath};
