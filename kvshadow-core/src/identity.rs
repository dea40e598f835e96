//! Identity types and value fingerprints

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outbox event identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, so ties on `created_at` still sort by creation.
pub type EventId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Number of hex characters kept from the BLAKE3 digest.
pub const FINGERPRINT_HEX_LEN: usize = 16;

/// Generate a new UUIDv7 EventId (timestamp-sortable).
pub fn new_event_id() -> EventId {
    Uuid::now_v7()
}

/// Compute the content fingerprint of a cache value.
///
/// This is a cheap inequality check for drift reports, not an integrity
/// guarantee. The digest is truncated to [`FINGERPRINT_HEX_LEN`] hex chars.
pub fn compute_fingerprint(value: &str) -> String {
    let digest = blake3::hash(value.as_bytes());
    let mut encoded = hex::encode(digest.as_bytes());
    encoded.truncate(FINGERPRINT_HEX_LEN);
    encoded
}

/// Normalize a caller-supplied TTL. Zero or negative means "no expiry".
pub fn normalize_ttl(ttl_secs: Option<i64>) -> Option<u64> {
    match ttl_secs {
        Some(secs) if secs > 0 => Some(secs as u64),
        _ => None,
    }
}
