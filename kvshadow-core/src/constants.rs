//! Constants for kvshadow
//!
//! Defaults for every tunable, plus collection names and key prefixes shared
//! between crates.

// ============================================================================
// HYBRID SYNCHRONIZER
// ============================================================================

/// Deadline for the direct shadow write before falling back to the outbox.
pub const DEFAULT_DIRECT_TIMEOUT_MS: u64 = 2000;

/// Number of concurrent direct-path workers.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Fraction of the pool that must be busy before the pool counts as saturated.
pub const DEFAULT_SATURATION_RATIO: f64 = 0.8;

/// Unprocessed outbox events above which the system is considered overloaded.
pub const DEFAULT_EVENT_BACKLOG_THRESHOLD: u64 = 100;

// ============================================================================
// OUTBOX PROJECTOR
// ============================================================================

/// Maximum events drained per projector tick.
pub const DEFAULT_PROJECTOR_BATCH_SIZE: usize = 50;

/// Delay between projector ticks.
pub const DEFAULT_PROJECTOR_INTERVAL_MS: u64 = 2000;

/// Delay before the first projector tick.
pub const DEFAULT_PROJECTOR_INITIAL_DELAY_MS: u64 = 5000;

// ============================================================================
// VERIFICATION
// ============================================================================

/// Shadow records not written for this long are reported stale (24 hours).
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 86_400;

/// Shadow records compared per cache round trip.
pub const DEFAULT_VERIFY_PAGE_SIZE: usize = 500;

/// Delay between scheduled health checks (5 minutes).
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 300;

/// Delay before the first scheduled health check.
pub const DEFAULT_HEALTH_CHECK_INITIAL_DELAY_SECS: u64 = 60;

// ============================================================================
// KEY SCANS
// ============================================================================

/// Scan limit used when the caller passes zero or a negative limit.
pub const DEFAULT_SCAN_LIMIT: usize = 100;

/// Upper bound on any single scan.
pub const MAX_SCAN_LIMIT: usize = 1000;

/// Reported TTL for keys that exist without an expiry.
pub const NO_EXPIRY_TTL: i64 = -1;

// ============================================================================
// COLLECTIONS
// ============================================================================

pub const SHADOW_COLLECTION: &str = "kvshadow";
pub const OUTBOX_COLLECTION: &str = "outbox";
pub const SESSIONS_COLLECTION: &str = "sessions";
pub const INTERACTIONS_COLLECTION: &str = "interactions";

// ============================================================================
// CACHE KEY PREFIXES
// ============================================================================

pub const SESSION_KEY_PREFIX: &str = "session:";
pub const INTERACTION_KEY_PREFIX: &str = "interaction:";
