//! Report types produced by verification, repair, projection and the
//! synchronizer's statistics endpoint.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::health::HealthCheck;
use crate::identity::Timestamp;

// ============================================================================
// VERIFICATION
// ============================================================================

/// Overall verdict of a verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncHealth {
    Healthy,
    IssuesDetected,
}

impl SyncHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::IssuesDetected => "ISSUES_DETECTED",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for SyncHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key whose live cache value differs from its shadow record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct MismatchEntry {
    pub key: String,
    /// `None` when the cache no longer holds the key.
    pub cache_value: Option<String>,
    pub shadow_value: String,
    #[serde(rename = "shadowHash")]
    pub shadow_fingerprint: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub last_write_at: Timestamp,
}

/// Result of comparing every shadow record against the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub all_in_sync: bool,
    pub checked_keys: u64,
    pub mismatches: Vec<MismatchEntry>,
}

impl ComparisonReport {
    /// Build a report; `all_in_sync` holds when there are no mismatches.
    pub fn new(checked_keys: u64, mismatches: Vec<MismatchEntry>) -> Self {
        Self {
            all_in_sync: mismatches.is_empty(),
            checked_keys,
            mismatches,
        }
    }
}

/// Shadow records whose last write is older than the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct StalenessReport {
    pub stale_keys: Vec<String>,
    pub stale_count: u64,
    /// Records last written before this instant are stale.
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub stale_threshold: Timestamp,
}

impl StalenessReport {
    /// Build a report from the stale keys found before `stale_threshold`.
    pub fn new(stale_keys: Vec<String>, stale_threshold: Timestamp) -> Self {
        Self {
            stale_count: stale_keys.len() as u64,
            stale_keys,
            stale_threshold,
        }
    }
}

/// Full verification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncVerificationReport {
    pub unprocessed_outbox_events: u64,
    #[serde(rename = "cacheVsShadowSync")]
    pub comparison: ComparisonReport,
    #[serde(rename = "staleEntriesCheck")]
    pub staleness: StalenessReport,
    #[serde(rename = "overallSyncHealth")]
    pub overall: SyncHealth,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub timestamp: Timestamp,
}

impl SyncVerificationReport {
    /// Assemble a report and derive the verdict: healthy iff there are no
    /// unprocessed events, no mismatches and no stale records.
    pub fn new(
        unprocessed_outbox_events: u64,
        comparison: ComparisonReport,
        staleness: StalenessReport,
    ) -> Self {
        let healthy = unprocessed_outbox_events == 0
            && comparison.all_in_sync
            && staleness.stale_keys.is_empty();
        Self {
            unprocessed_outbox_events,
            comparison,
            staleness,
            overall: if healthy {
                SyncHealth::Healthy
            } else {
                SyncHealth::IssuesDetected
            },
            timestamp: Utc::now(),
        }
    }

    /// Human-readable list of the signals that failed.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.unprocessed_outbox_events > 0 {
            issues.push(format!(
                "{} unprocessed outbox events",
                self.unprocessed_outbox_events
            ));
        }
        if !self.comparison.all_in_sync {
            issues.push(format!(
                "{} of {} keys out of sync",
                self.comparison.mismatches.len(),
                self.comparison.checked_keys
            ));
        }
        if self.staleness.stale_count > 0 {
            issues.push(format!("{} stale shadow records", self.staleness.stale_count));
        }
        issues
    }

    /// Map the verdict onto the generic health-check type.
    pub fn to_health_check(&self) -> HealthCheck {
        let check = match self.overall {
            SyncHealth::Healthy => HealthCheck::healthy("cache_sync"),
            SyncHealth::IssuesDetected => {
                HealthCheck::degraded("cache_sync", self.issues().join("; "))
            }
        };
        check
            .with_metadata(
                "unprocessedOutboxEvents",
                serde_json::json!(self.unprocessed_outbox_events),
            )
            .with_metadata("checkedKeys", serde_json::json!(self.comparison.checked_keys))
            .with_metadata(
                "mismatchCount",
                serde_json::json!(self.comparison.mismatches.len()),
            )
            .with_metadata("staleCount", serde_json::json!(self.staleness.stale_count))
    }
}

/// Sync status of a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct KeySyncStatus {
    pub key: String,
    pub cache_value: Option<String>,
    pub cache_exists: bool,
    pub shadow_exists: bool,
    pub shadow_value: Option<String>,
    #[serde(rename = "shadowHash")]
    pub shadow_fingerprint: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = DateTime))]
    pub last_write_at: Option<Timestamp>,
    pub session_id: Option<String>,
    pub interaction_id: Option<String>,
    pub in_sync: bool,
}

/// Remaining TTL of cache keys under a prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct TtlReport {
    /// Seconds remaining per key; `-1` when the key has no expiry.
    pub ttl_info: BTreeMap<String, i64>,
    pub scanned_keys: u64,
}

// ============================================================================
// REPAIR
// ============================================================================

/// What a forced repair did to the shadow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    CreatedShadow,
    RemovedShadow,
    UpdatedShadow,
    NoRepairNeeded,
    RepairFailed,
}

impl RepairAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedShadow => "created_shadow",
            Self::RemovedShadow => "removed_shadow",
            Self::UpdatedShadow => "updated_shadow",
            Self::NoRepairNeeded => "no_repair_needed",
            Self::RepairFailed => "repair_failed",
        }
    }
}

impl std::fmt::Display for RepairAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a forced repair of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RepairOutcome {
    pub action: RepairAction,
    pub key: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepairOutcome {
    /// A repair that completed with `action`.
    pub fn succeeded(key: impl Into<String>, action: RepairAction) -> Self {
        Self {
            action,
            key: key.into(),
            success: true,
            error: None,
        }
    }

    /// A repair that could not complete.
    pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action: RepairAction::RepairFailed,
            key: key.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

/// Effect of projecting one outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionOutcome {
    /// Shadow record created or replaced.
    Upserted,
    /// Shadow record removed by a tombstone.
    Deleted,
    /// A newer write already owns the shadow record.
    Superseded,
    /// The shadow record already reflects this event.
    AlreadyApplied,
    /// Event kind not understood; marked processed with no effect.
    SkippedUnknownKind,
}

/// Tally of one projector tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionReport {
    pub fetched: u64,
    pub upserted: u64,
    pub deleted: u64,
    pub superseded: u64,
    pub already_applied: u64,
    pub skipped_unknown: u64,
    /// Events left unprocessed because projection or the processed flip failed.
    pub failed: u64,
}

impl ProjectionReport {
    /// Count one applied event.
    pub fn record(&mut self, outcome: ProjectionOutcome) {
        match outcome {
            ProjectionOutcome::Upserted => self.upserted += 1,
            ProjectionOutcome::Deleted => self.deleted += 1,
            ProjectionOutcome::Superseded => self.superseded += 1,
            ProjectionOutcome::AlreadyApplied => self.already_applied += 1,
            ProjectionOutcome::SkippedUnknownKind => self.skipped_unknown += 1,
        }
    }

    /// Events marked processed in this tick.
    pub fn processed(&self) -> u64 {
        self.upserted + self.deleted + self.superseded + self.already_applied + self.skipped_unknown
    }
}

// ============================================================================
// SYNCHRONIZER STATISTICS
// ============================================================================

/// Snapshot of the direct-path worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct PoolUtilization {
    /// Tasks currently holding a worker slot.
    pub active: u64,
    /// Tasks waiting for a slot.
    pub queued: u64,
    /// Maximum concurrent direct writes.
    pub capacity: u64,
    /// Slots released since the pool started.
    pub completed: u64,
}

impl PoolUtilization {
    /// Returns true if `active >= capacity * ratio`.
    pub fn is_saturated(&self, ratio: f64) -> bool {
        self.active as f64 >= self.capacity as f64 * ratio
    }
}

/// Direct-path settings reported alongside the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncConfiguration {
    pub direct_timeout_ms: u64,
    pub pool_size: u64,
}

/// Outbox row counts at the time of the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct OutboxCounts {
    pub unprocessed: u64,
    pub total: u64,
}

/// Lifetime counters of synchronizer decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncCounters {
    pub direct: u64,
    pub queued: u64,
    pub both_failed: u64,
    pub high_load_skips: u64,
}

/// Synchronizer statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub pool: PoolUtilization,
    pub configuration: SyncConfiguration,
    pub outbox_events: OutboxCounts,
    pub counters: SyncCounters,
}

/// Breakdown of the high-load heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct LoadAssessment {
    pub pool_saturated: bool,
    pub queue_backlog: bool,
    pub event_backlog: bool,
    pub pool: PoolUtilization,
    /// `None` when the backlog count could not be read.
    pub unprocessed_events: Option<u64>,
    pub high_load: bool,
    pub recommendation: String,
}

impl LoadAssessment {
    /// Combine the pool signals and the outbox backlog into one verdict.
    pub fn new(
        pool: PoolUtilization,
        saturation_ratio: f64,
        unprocessed_events: Option<u64>,
        backlog_threshold: u64,
    ) -> Self {
        let pool_saturated = pool.is_saturated(saturation_ratio);
        let queue_backlog = pool.queued > 0;
        let event_backlog = unprocessed_events.is_some_and(|n| n > backlog_threshold);
        let high_load = pool_saturated || queue_backlog || event_backlog;

        let recommendation = if event_backlog {
            "Outbox backlog is growing; check projector health before repairing keys"
        } else if pool_saturated || queue_backlog {
            "Direct path saturated; writes are routed through the outbox"
        } else {
            "Normal load; writes use the direct path"
        }
        .to_string();

        Self {
            pool_saturated,
            queue_backlog,
            event_backlog,
            pool,
            unprocessed_events,
            high_load,
            recommendation,
        }
    }
}
