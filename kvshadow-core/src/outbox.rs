//! Outbox event types.
//!
//! An outbox event is the durable record of an intended shadow update. The
//! log is append-only: the projector flips `processed` once and never
//! deletes rows, so the table doubles as an audit trail.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use crate::identity::{new_event_id, normalize_ttl, EventId, Timestamp};

/// Wire tag for [`OutboxEventKind::KvMutated`].
pub const KV_MUTATED_TAG: &str = "KVMutated";

/// Kind of an outbox event.
///
/// Unknown tags are preserved rather than rejected so that an older
/// projector can skip events written by a newer producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OutboxEventKind {
    /// A cache key was set or deleted.
    KvMutated,
    /// A kind this build does not understand.
    Unknown(String),
}

impl OutboxEventKind {
    /// Wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::KvMutated => KV_MUTATED_TAG,
            Self::Unknown(tag) => tag,
        }
    }

}

impl From<String> for OutboxEventKind {
    fn from(tag: String) -> Self {
        if tag == KV_MUTATED_TAG {
            Self::KvMutated
        } else {
            Self::Unknown(tag)
        }
    }
}

impl From<OutboxEventKind> for String {
    fn from(kind: OutboxEventKind) -> Self {
        match kind {
            OutboxEventKind::KvMutated => KV_MUTATED_TAG.to_string(),
            OutboxEventKind::Unknown(tag) => tag,
        }
    }
}

impl std::fmt::Display for OutboxEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a mutation went through the outbox instead of the direct path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackReason {
    /// The direct shadow write did not finish within the timeout.
    DirectTimeout,
    /// The direct shadow write returned an error or was cancelled.
    DirectFailed,
    /// The direct path was skipped because the system was saturated.
    HighLoad,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectTimeout => "DIRECT_TIMEOUT",
            Self::DirectFailed => "DIRECT_FAILED",
            Self::HighLoad => "HIGH_LOAD",
        }
    }

    /// Parse a wire tag. Legacy producers wrote a single
    /// `ASYNC_TIMEOUT_OR_FAILURE` reason for every fallback.
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "DIRECT_TIMEOUT" => Some(Self::DirectTimeout),
            "DIRECT_FAILED" | "ASYNC_TIMEOUT_OR_FAILURE" => Some(Self::DirectFailed),
            "HIGH_LOAD" => Some(Self::HighLoad),
            _ => None,
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a [`OutboxEventKind::KvMutated`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct OutboxPayload {
    /// Cache key that was mutated.
    pub key: String,
    /// New value, or `None` for a delete (tombstone).
    #[serde(default)]
    pub value: Option<String>,
    /// TTL the cache write was made with, if any. Zero or negative on the
    /// wire means no expiry.
    #[serde(default, rename = "ttlSec", deserialize_with = "lenient_ttl")]
    pub ttl_secs: Option<u64>,
    #[serde(default, deserialize_with = "non_empty")]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub interaction_id: Option<String>,
    /// Set when the event was produced by the synchronizer's fallback path.
    /// Reasons this build does not recognise decode as `None`.
    #[serde(default, deserialize_with = "lenient_fallback_reason")]
    pub fallback_reason: Option<FallbackReason>,
    /// Write sequence assigned when the mutation was first synchronized.
    /// Events from producers that do not sequence their writes leave this empty.
    #[serde(default)]
    pub write_seq: Option<u64>,
}

impl OutboxPayload {
    /// Payload for a set. `ttl_secs <= 0` is stored as no expiry.
    pub fn set(key: impl Into<String>, value: impl Into<String>, ttl_secs: Option<i64>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            ttl_secs: normalize_ttl(ttl_secs),
            session_id: None,
            interaction_id: None,
            fallback_reason: None,
            write_seq: None,
        }
    }

    /// Tombstone payload for a delete.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            ttl_secs: None,
            session_id: None,
            interaction_id: None,
            fallback_reason: None,
            write_seq: None,
        }
    }

    /// Attach a session id. Empty ids are dropped, as on decode.
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|s| !s.is_empty());
        self
    }

    pub fn with_interaction(mut self, interaction_id: Option<String>) -> Self {
        self.interaction_id = interaction_id.filter(|s| !s.is_empty());
        self
    }

    pub fn with_fallback_reason(mut self, reason: FallbackReason) -> Self {
        self.fallback_reason = Some(reason);
        self
    }

    pub fn with_write_seq(mut self, write_seq: u64) -> Self {
        self.write_seq = Some(write_seq);
        self
    }

    /// Returns true if this payload deletes the key.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

fn lenient_ttl<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(secs) => (secs > 0).then_some(secs),
            None => normalize_ttl(n.as_i64()),
        },
        _ => None,
    })
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

fn lenient_fallback_reason<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<FallbackReason>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(FallbackReason::from_wire))
}

/// A pending mutation intended for the shadow store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub kind: OutboxEventKind,
    #[serde(rename = "ts")]
    pub created_at: Timestamp,
    /// Structured payload. Kept as raw JSON so that events of unknown kinds
    /// (and malformed payloads) survive a round trip through the store.
    pub payload: serde_json::Value,
    pub processed: bool,
    #[serde(default)]
    pub processed_at: Option<Timestamp>,
}

impl OutboxEvent {
    /// Create a new, unprocessed key-mutation event.
    pub fn key_mutated(payload: &OutboxPayload) -> Self {
        // OutboxPayload contains only strings, integers and enums, which
        // always serialize.
        let payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        Self::with_raw_payload(OutboxEventKind::KvMutated, payload)
    }

    /// Create a new, unprocessed event with an arbitrary kind and payload.
    pub fn with_raw_payload(kind: OutboxEventKind, payload: serde_json::Value) -> Self {
        Self {
            id: new_event_id(),
            kind,
            created_at: Utc::now(),
            payload,
            processed: false,
            processed_at: None,
        }
    }

    /// Decode the payload of a key-mutation event.
    pub fn kv_payload(&self) -> Result<OutboxPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Key this event targets, if the payload carries one.
    pub fn key(&self) -> Option<&str> {
        self.payload.get("key").and_then(|k| k.as_str())
    }

    /// Mark the event processed at the given time.
    pub fn mark_processed(&mut self, at: Timestamp) {
        self.processed = true;
        self.processed_at = Some(at);
    }
}
