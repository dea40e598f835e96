//! Configuration for the synchronizer, projector and verification engine.
//!
//! Every section reads `KVSHADOW_*` environment variables with fallback to
//! the defaults in [`crate::constants`].

use crate::constants::{
    DEFAULT_DIRECT_TIMEOUT_MS, DEFAULT_EVENT_BACKLOG_THRESHOLD,
    DEFAULT_HEALTH_CHECK_INITIAL_DELAY_SECS, DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
    DEFAULT_POOL_SIZE, DEFAULT_PROJECTOR_BATCH_SIZE, DEFAULT_PROJECTOR_INITIAL_DELAY_MS,
    DEFAULT_PROJECTOR_INTERVAL_MS, DEFAULT_SATURATION_RATIO, DEFAULT_SCAN_LIMIT,
    DEFAULT_STALE_THRESHOLD_SECS, DEFAULT_VERIFY_PAGE_SIZE, MAX_SCAN_LIMIT,
};
use crate::error::ConfigError;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn require_non_zero(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(invalid(field, format!("{:?}", value), "must be positive"));
    }
    Ok(())
}

// ============================================================================
// HYBRID SYNCHRONIZER
// ============================================================================

/// Settings for the direct-vs-queued decision.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSyncConfig {
    /// How long a caller waits for the direct shadow write (default: 2s).
    pub direct_timeout: Duration,
    /// Concurrent direct-path workers (default: 10).
    pub pool_size: usize,
    /// Busy fraction of the pool that counts as saturated (default: 0.8).
    pub saturation_ratio: f64,
    /// Unprocessed outbox events that count as a backlog (default: 100).
    pub event_backlog_threshold: u64,
}

impl Default for HybridSyncConfig {
    fn default() -> Self {
        Self {
            direct_timeout: Duration::from_millis(DEFAULT_DIRECT_TIMEOUT_MS),
            pool_size: DEFAULT_POOL_SIZE,
            saturation_ratio: DEFAULT_SATURATION_RATIO,
            event_backlog_threshold: DEFAULT_EVENT_BACKLOG_THRESHOLD,
        }
    }
}

impl HybridSyncConfig {
    /// Create from environment variables.
    ///
    /// - `KVSHADOW_DIRECT_TIMEOUT_MS` (default: 2000)
    /// - `KVSHADOW_POOL_SIZE` (default: 10)
    /// - `KVSHADOW_SATURATION_RATIO` (default: 0.8)
    /// - `KVSHADOW_EVENT_BACKLOG_THRESHOLD` (default: 100)
    pub fn from_env() -> Self {
        Self {
            direct_timeout: Duration::from_millis(env_or(
                "KVSHADOW_DIRECT_TIMEOUT_MS",
                DEFAULT_DIRECT_TIMEOUT_MS,
            )),
            pool_size: env_or("KVSHADOW_POOL_SIZE", DEFAULT_POOL_SIZE),
            saturation_ratio: env_or("KVSHADOW_SATURATION_RATIO", DEFAULT_SATURATION_RATIO),
            event_backlog_threshold: env_or(
                "KVSHADOW_EVENT_BACKLOG_THRESHOLD",
                DEFAULT_EVENT_BACKLOG_THRESHOLD,
            ),
        }
    }

    /// Small pool and short timeout for local runs and tests.
    pub fn development() -> Self {
        Self {
            direct_timeout: Duration::from_millis(250),
            pool_size: 4,
            ..Self::default()
        }
    }

    pub fn with_direct_timeout(mut self, timeout: Duration) -> Self {
        self.direct_timeout = timeout;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_saturation_ratio(mut self, ratio: f64) -> Self {
        self.saturation_ratio = ratio;
        self
    }

    pub fn with_event_backlog_threshold(mut self, threshold: u64) -> Self {
        self.event_backlog_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("direct_timeout", self.direct_timeout)?;
        if self.pool_size == 0 {
            return Err(invalid("pool_size", self.pool_size, "must be greater than 0"));
        }
        if !(self.saturation_ratio > 0.0 && self.saturation_ratio <= 1.0) {
            return Err(invalid(
                "saturation_ratio",
                self.saturation_ratio,
                "must be in (0.0, 1.0]",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// OUTBOX PROJECTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectorConfig {
    /// Maximum events drained per tick (default: 50).
    pub batch_size: usize,
    /// Delay between ticks (default: 2s).
    pub interval: Duration,
    /// Delay before the first tick (default: 5s).
    pub initial_delay: Duration,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_PROJECTOR_BATCH_SIZE,
            interval: Duration::from_millis(DEFAULT_PROJECTOR_INTERVAL_MS),
            initial_delay: Duration::from_millis(DEFAULT_PROJECTOR_INITIAL_DELAY_MS),
        }
    }
}

impl ProjectorConfig {
    /// Create from environment variables.
    ///
    /// - `KVSHADOW_PROJECTOR_BATCH_SIZE` (default: 50)
    /// - `KVSHADOW_PROJECTOR_INTERVAL_MS` (default: 2000)
    /// - `KVSHADOW_PROJECTOR_INITIAL_DELAY_MS` (default: 5000)
    pub fn from_env() -> Self {
        Self {
            batch_size: env_or("KVSHADOW_PROJECTOR_BATCH_SIZE", DEFAULT_PROJECTOR_BATCH_SIZE),
            interval: Duration::from_millis(env_or(
                "KVSHADOW_PROJECTOR_INTERVAL_MS",
                DEFAULT_PROJECTOR_INTERVAL_MS,
            )),
            initial_delay: Duration::from_millis(env_or(
                "KVSHADOW_PROJECTOR_INITIAL_DELAY_MS",
                DEFAULT_PROJECTOR_INITIAL_DELAY_MS,
            )),
        }
    }

    pub fn development() -> Self {
        Self {
            interval: Duration::from_millis(200),
            initial_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", self.batch_size, "must be greater than 0"));
        }
        require_non_zero("projector_interval", self.interval)
    }
}

// ============================================================================
// VERIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationConfig {
    /// Records older than this are stale (default: 24h).
    pub stale_threshold: Duration,
    /// Shadow records per cache round trip (default: 500).
    pub page_size: usize,
    /// Delay between scheduled health checks (default: 5 min).
    pub health_check_interval: Duration,
    /// Delay before the first health check (default: 60s).
    pub health_check_initial_delay: Duration,
    /// TTL scan limit used for non-positive requests (default: 100).
    pub default_scan_limit: usize,
    /// Hard cap on TTL scans (default: 1000).
    pub max_scan_limit: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(DEFAULT_STALE_THRESHOLD_SECS),
            page_size: DEFAULT_VERIFY_PAGE_SIZE,
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            health_check_initial_delay: Duration::from_secs(
                DEFAULT_HEALTH_CHECK_INITIAL_DELAY_SECS,
            ),
            default_scan_limit: DEFAULT_SCAN_LIMIT,
            max_scan_limit: MAX_SCAN_LIMIT,
        }
    }
}

impl VerificationConfig {
    /// Create from environment variables.
    ///
    /// - `KVSHADOW_STALE_THRESHOLD_SECS` (default: 86400)
    /// - `KVSHADOW_VERIFY_PAGE_SIZE` (default: 500)
    /// - `KVSHADOW_HEALTH_CHECK_INTERVAL_SECS` (default: 300)
    /// - `KVSHADOW_HEALTH_CHECK_INITIAL_DELAY_SECS` (default: 60)
    pub fn from_env() -> Self {
        Self {
            stale_threshold: Duration::from_secs(env_or(
                "KVSHADOW_STALE_THRESHOLD_SECS",
                DEFAULT_STALE_THRESHOLD_SECS,
            )),
            page_size: env_or("KVSHADOW_VERIFY_PAGE_SIZE", DEFAULT_VERIFY_PAGE_SIZE),
            health_check_interval: Duration::from_secs(env_or(
                "KVSHADOW_HEALTH_CHECK_INTERVAL_SECS",
                DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            )),
            health_check_initial_delay: Duration::from_secs(env_or(
                "KVSHADOW_HEALTH_CHECK_INITIAL_DELAY_SECS",
                DEFAULT_HEALTH_CHECK_INITIAL_DELAY_SECS,
            )),
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            page_size: 50,
            health_check_interval: Duration::from_secs(10),
            health_check_initial_delay: Duration::from_secs(1),
            ..Self::default()
        }
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_health_check_initial_delay(mut self, delay: Duration) -> Self {
        self.health_check_initial_delay = delay;
        self
    }

    /// Clamp a caller-supplied scan limit: non-positive becomes the default,
    /// anything above the cap becomes the cap.
    pub fn clamp_scan_limit(&self, requested: i64) -> usize {
        if requested <= 0 {
            return self.default_scan_limit.min(self.max_scan_limit);
        }
        usize::try_from(requested)
            .unwrap_or(usize::MAX)
            .min(self.max_scan_limit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("stale_threshold", self.stale_threshold)?;
        require_non_zero("health_check_interval", self.health_check_interval)?;
        if self.page_size == 0 {
            return Err(invalid("page_size", self.page_size, "must be greater than 0"));
        }
        if self.default_scan_limit > self.max_scan_limit {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("default_scan_limit={}", self.default_scan_limit),
                option_b: format!("max_scan_limit={}", self.max_scan_limit),
            });
        }
        Ok(())
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncConfig {
    pub hybrid: HybridSyncConfig,
    pub projector: ProjectorConfig,
    pub verification: VerificationConfig,
}

impl SyncConfig {
    /// Read every section from the environment and validate the result.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            hybrid: HybridSyncConfig::from_env(),
            projector: ProjectorConfig::from_env(),
            verification: VerificationConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn development() -> Self {
        Self {
            hybrid: HybridSyncConfig::development(),
            projector: ProjectorConfig::development(),
            verification: VerificationConfig::development(),
        }
    }

    pub fn with_hybrid(mut self, hybrid: HybridSyncConfig) -> Self {
        self.hybrid = hybrid;
        self
    }

    pub fn with_projector(mut self, projector: ProjectorConfig) -> Self {
        self.projector = projector;
        self
    }

    pub fn with_verification(mut self, verification: VerificationConfig) -> Self {
        self.verification = verification;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hybrid.validate()?;
        self.projector.validate()?;
        self.verification.validate()
    }
}
