//! Error types for kvshadow operations

use thiserror::Error;

/// Storage layer errors, raised by cache and document drivers and by the
/// repositories built on top of them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{store} unavailable: {reason}")]
    Unavailable { store: String, reason: String },

    #[error("Document not found in {collection} with id {id}")]
    NotFound { collection: String, id: String },

    #[error("Write to {store} failed: {reason}")]
    WriteFailed { store: String, reason: String },

    #[error("Serialization failed for {collection}: {reason}")]
    Serialization { collection: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Convenience constructor for a serde failure on a collection.
    pub fn serialization(collection: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            collection: collection.into(),
            reason: err.to_string(),
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Errors internal to the synchronization engine. These never reach a
/// synchronizer caller directly; they are folded into a `SyncResult`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Worker pool closed")]
    PoolClosed,

    #[error("Direct path for key {key} did not complete: {reason}")]
    DirectPathAborted { key: String, reason: String },

    #[error("Background job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },
}

/// Master error type for all kvshadow errors.
#[derive(Debug, Clone, Error)]
pub enum KvShadowError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type alias for kvshadow operations.
pub type KvShadowResult<T> = Result<T, KvShadowError>;

// =============================================================================
// TESTS
// =============================================================================
