//! Result of a single synchronization attempt.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::identity::Timestamp;

/// Path a synchronization attempt ended up taking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMethod {
    /// Shadow record was written inline.
    Direct,
    /// An outbox event was appended for the projector.
    Queued,
    /// Neither the direct write nor the outbox append succeeded.
    BothFailed,
}

impl SyncMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "DIRECT",
            Self::Queued => "QUEUED",
            Self::BothFailed => "BOTH_FAILED",
        }
    }
}

impl std::fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value object returned from every synchronization attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub method: SyncMethod,
    pub message: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub timestamp: Timestamp,
}

impl SyncResult {
    pub fn direct(message: impl Into<String>) -> Self {
        Self::build(true, SyncMethod::Direct, message)
    }

    pub fn queued(message: impl Into<String>) -> Self {
        Self::build(true, SyncMethod::Queued, message)
    }

    pub fn both_failed(message: impl Into<String>) -> Self {
        Self::build(false, SyncMethod::BothFailed, message)
    }

    fn build(success: bool, method: SyncMethod, message: impl Into<String>) -> Self {
        Self {
            success,
            method,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
