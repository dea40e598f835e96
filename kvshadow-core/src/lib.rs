//! kvshadow Core - Data Types
//!
//! Outbox events, shadow records, sync results and verification reports,
//! plus the error taxonomy and configuration shared by every other crate.
//! Nothing in here performs I/O.

pub mod config;
pub mod constants;
pub mod error;
pub mod filter;
pub mod health;
pub mod identity;
pub mod outbox;
pub mod report;
pub mod sequence;
pub mod session;
pub mod shadow;
pub mod sync;

pub use config::{HybridSyncConfig, ProjectorConfig, SyncConfig, VerificationConfig};
pub use error::{
    ConfigError, KvShadowError, KvShadowResult, StorageError, SyncError, ValidationError,
};
pub use filter::{DocumentQuery, FilterExpr, FilterOperator, SortKey, SortOrder};
pub use health::{HealthCheck, HealthStatus};
pub use identity::{
    compute_fingerprint, new_event_id, normalize_ttl, EventId, Timestamp, FINGERPRINT_HEX_LEN,
};
pub use outbox::{FallbackReason, OutboxEvent, OutboxEventKind, OutboxPayload};
pub use report::{
    ComparisonReport, KeySyncStatus, LoadAssessment, MismatchEntry, OutboxCounts,
    PoolUtilization, ProjectionOutcome, ProjectionReport, RepairAction, RepairOutcome,
    StalenessReport, SyncConfiguration, SyncCounters, SyncHealth, SyncStats,
    SyncVerificationReport, TtlReport,
};
pub use sequence::WriteSequencer;
pub use session::{Interaction, Session};
pub use shadow::{ShadowMetadata, ShadowRecord, WriteSource};
pub use sync::{SyncMethod, SyncResult};
