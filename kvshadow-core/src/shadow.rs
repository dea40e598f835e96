//! Shadow records: the synchronizer's last-known view of each cache key.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::{compute_fingerprint, Timestamp};
use crate::outbox::{FallbackReason, OutboxPayload};

/// Which path produced a shadow write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteSource {
    /// Written inline by the synchronizer's direct path.
    Direct,
    /// Written by the projector from an outbox event.
    Queued,
    /// Written by an explicit repair.
    Repair,
}

/// Provenance attached to every shadow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowMetadata {
    pub source: WriteSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    #[serde(default, rename = "ttlSec", skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub repaired: bool,
    /// Free-form fields from other writers, kept verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ShadowMetadata {
    pub fn new(source: WriteSource) -> Self {
        Self {
            source,
            fallback_reason: None,
            ttl_secs: None,
            repaired: false,
            extra: HashMap::new(),
        }
    }

    pub fn direct(ttl_secs: Option<u64>) -> Self {
        Self {
            ttl_secs,
            ..Self::new(WriteSource::Direct)
        }
    }

    pub fn queued(fallback_reason: Option<FallbackReason>, ttl_secs: Option<u64>) -> Self {
        Self {
            fallback_reason,
            ttl_secs,
            ..Self::new(WriteSource::Queued)
        }
    }

    pub fn repair() -> Self {
        Self {
            repaired: true,
            ..Self::new(WriteSource::Repair)
        }
    }
}

/// Durable tracking record for one cache key.
///
/// At most one record exists per key. Absence of a record means the key was
/// never observed or was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowRecord {
    pub key: String,
    pub last_value: String,
    /// Truncated BLAKE3 of `last_value`. Always recomputed, never copied.
    #[serde(rename = "valueHash")]
    pub fingerprint: String,
    pub last_write_at: Timestamp,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub interaction_id: Option<String>,
    /// Sequence of the write that produced this record. Zero for records
    /// created by producers that do not sequence their writes.
    #[serde(default)]
    pub write_seq: u64,
    pub metadata: ShadowMetadata,
}

impl ShadowRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        write_seq: u64,
        metadata: ShadowMetadata,
    ) -> Self {
        let last_value = value.into();
        Self {
            key: key.into(),
            fingerprint: compute_fingerprint(&last_value),
            last_value,
            last_write_at: Utc::now(),
            session_id: None,
            interaction_id: None,
            write_seq,
            metadata,
        }
    }

    /// Build a record from a non-tombstone outbox payload.
    ///
    /// Returns `None` for tombstones, which delete rather than upsert.
    pub fn from_payload(payload: &OutboxPayload, write_seq: u64, metadata: ShadowMetadata) -> Option<Self> {
        let value = payload.value.as_ref()?;
        Some(
            Self::new(payload.key.clone(), value.clone(), write_seq, metadata)
                .with_correlation(payload.session_id.clone(), payload.interaction_id.clone()),
        )
    }

    pub fn with_correlation(
        mut self,
        session_id: Option<String>,
        interaction_id: Option<String>,
    ) -> Self {
        self.session_id = session_id;
        self.interaction_id = interaction_id;
        self
    }

    /// Replace the stored value, recomputing the fingerprint and write time.
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.last_value = value.into();
        self.fingerprint = compute_fingerprint(&self.last_value);
        self.last_write_at = Utc::now();
    }

    /// Returns true if the stored fingerprint matches the stored value.
    pub fn fingerprint_is_current(&self) -> bool {
        self.fingerprint == compute_fingerprint(&self.last_value)
    }
}
