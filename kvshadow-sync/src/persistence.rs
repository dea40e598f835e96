//! Multi-Tier Persistence
//!
//! Sessions and interactions are saved in full to the document store, and a
//! strategy-dependent JSON projection is cached under `session:<id>` or
//! `interaction:<id>` and tracked through the hybrid synchronizer. The
//! document save and the cache write run concurrently; the document save is
//! required for the call to succeed.

use chrono::Utc;
use kvshadow_core::constants::{
    INTERACTIONS_COLLECTION, INTERACTION_KEY_PREFIX, SESSIONS_COLLECTION, SESSION_KEY_PREFIX,
};
use kvshadow_core::{
    normalize_ttl, Interaction, KvShadowResult, Session, StorageError, SyncResult, Timestamp,
    ValidationError,
};
use kvshadow_storage::{CacheStore, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::hybrid::{HybridSynchronizer, KvWrite};

// ============================================================================
// CACHE STRATEGIES
// ============================================================================

/// How much of a session is cached, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionCacheStrategy {
    /// Document store only.
    None,
    CriticalOnly,
    WithContext,
    FullSession,
}

impl SessionCacheStrategy {
    pub const ALL: [Self; 4] = [
        Self::None,
        Self::CriticalOnly,
        Self::WithContext,
        Self::FullSession,
    ];

    pub fn ttl_secs(&self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::CriticalOnly => Some(3600),
            Self::WithContext => Some(1800),
            Self::FullSession => Some(900),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::CriticalOnly => "CRITICAL_ONLY",
            Self::WithContext => "WITH_CONTEXT",
            Self::FullSession => "FULL_SESSION",
        }
    }

    /// Parse case-insensitively, using `fallback` for unrecognised input.
    pub fn parse_or(input: &str, fallback: Self) -> Self {
        input.parse().unwrap_or(fallback)
    }

    fn describe(&self) -> StrategyInfo {
        let (description, use_case) = match self {
            Self::None => ("No caching, document store only", "Archival sessions, completed sessions"),
            Self::CriticalOnly => (
                "Cache essential session info only",
                "Active sessions requiring fast status checks",
            ),
            Self::WithContext => (
                "Cache session info with context",
                "Active sessions with frequent context access",
            ),
            Self::FullSession => (
                "Cache complete session data",
                "Highly active sessions requiring full data access",
            ),
        };
        StrategyInfo::new(self.as_str(), description, self.ttl_secs(), use_case)
    }
}

impl FromStr for SessionCacheStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| unknown_strategy(s))
    }
}

/// How much of an interaction is cached, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionCacheStrategy {
    None,
    ResponseOnly,
    WithContext,
    FullInteraction,
}

impl InteractionCacheStrategy {
    pub const ALL: [Self; 4] = [
        Self::None,
        Self::ResponseOnly,
        Self::WithContext,
        Self::FullInteraction,
    ];

    pub fn ttl_secs(&self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::ResponseOnly => Some(1800),
            Self::WithContext => Some(900),
            Self::FullInteraction => Some(300),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ResponseOnly => "RESPONSE_ONLY",
            Self::WithContext => "WITH_CONTEXT",
            Self::FullInteraction => "FULL_INTERACTION",
        }
    }

    pub fn parse_or(input: &str, fallback: Self) -> Self {
        input.parse().unwrap_or(fallback)
    }

    fn describe(&self) -> StrategyInfo {
        let (description, use_case) = match self {
            Self::None => (
                "No caching, document store only",
                "Historical interactions, completed conversations",
            ),
            Self::ResponseOnly => (
                "Cache interaction response only",
                "Recent interactions for quick response retrieval",
            ),
            Self::WithContext => (
                "Cache interaction with context",
                "Active conversations requiring context",
            ),
            Self::FullInteraction => (
                "Cache complete interaction data",
                "Current interaction being processed",
            ),
        };
        StrategyInfo::new(self.as_str(), description, self.ttl_secs(), use_case)
    }
}

impl FromStr for InteractionCacheStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| unknown_strategy(s))
    }
}

fn unknown_strategy(input: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: "cache_strategy".to_string(),
        reason: format!("unknown strategy '{}'", input),
    }
}

/// Catalogue entry describing one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "ttl")]
    pub ttl_secs: Option<u64>,
    pub use_case: String,
}

impl StrategyInfo {
    fn new(name: &str, description: &str, ttl_secs: Option<u64>, use_case: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            ttl_secs,
            use_case: use_case.to_string(),
        }
    }
}

pub fn session_cache_strategies() -> Vec<StrategyInfo> {
    SessionCacheStrategy::ALL.iter().map(|s| s.describe()).collect()
}

pub fn interaction_cache_strategies() -> Vec<StrategyInfo> {
    InteractionCacheStrategy::ALL.iter().map(|s| s.describe()).collect()
}

/// Suggested strategy pair for a usage pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRecommendation {
    pub session_strategy: SessionCacheStrategy,
    pub interaction_strategy: InteractionCacheStrategy,
    pub reasoning: String,
}

/// Recommend strategies for `high_frequency`, `real_time`, `analytical` or
/// `archival` workloads. Anything else gets the balanced default.
pub fn recommend_strategies(usage_pattern: &str) -> StrategyRecommendation {
    let (session_strategy, interaction_strategy, reasoning) =
        match usage_pattern.to_ascii_lowercase().as_str() {
            "high_frequency" => (
                SessionCacheStrategy::WithContext,
                InteractionCacheStrategy::ResponseOnly,
                "Frequent access benefits from cached context; full interaction caching would crowd the cache",
            ),
            "real_time" => (
                SessionCacheStrategy::FullSession,
                InteractionCacheStrategy::FullInteraction,
                "Real-time workloads need immediate access to all data",
            ),
            "analytical" => (
                SessionCacheStrategy::CriticalOnly,
                InteractionCacheStrategy::None,
                "Analytical workloads query the document store directly",
            ),
            "archival" => (
                SessionCacheStrategy::None,
                InteractionCacheStrategy::None,
                "Archival data does not need caching",
            ),
            _ => (
                SessionCacheStrategy::CriticalOnly,
                InteractionCacheStrategy::ResponseOnly,
                "Balanced default for general workloads",
            ),
        };
    StrategyRecommendation {
        session_strategy,
        interaction_strategy,
        reasoning: reasoning.to_string(),
    }
}

// ============================================================================
// CACHE PROJECTIONS
// ============================================================================

/// JSON cached for a session under `strategy`. `None` for [`SessionCacheStrategy::None`].
pub fn session_cache_value(session: &Session, strategy: SessionCacheStrategy) -> Option<Value> {
    let mut value = json!({
        "sessionId": session.session_id,
        "userId": session.user_id,
        "status": session.status,
        "lastActivity": session.last_activity_at,
    });
    let fields = value.as_object_mut()?;
    match strategy {
        SessionCacheStrategy::None => return None,
        SessionCacheStrategy::CriticalOnly => {}
        SessionCacheStrategy::WithContext => {
            fields.insert("context".to_string(), Value::Object(session.context.clone()));
            fields.insert("interactionCount".to_string(), json!(session.interaction_count));
        }
        SessionCacheStrategy::FullSession => {
            fields.insert("startedAt".to_string(), json!(session.started_at));
            fields.insert("context".to_string(), Value::Object(session.context.clone()));
            fields.insert("metadata".to_string(), Value::Object(session.metadata.clone()));
            fields.insert("interactionCount".to_string(), json!(session.interaction_count));
        }
    }
    Some(value)
}

/// JSON cached for an interaction under `strategy`.
pub fn interaction_cache_value(
    interaction: &Interaction,
    strategy: InteractionCacheStrategy,
) -> Option<Value> {
    let mut value = json!({
        "interactionId": interaction.interaction_id,
        "response": interaction.response,
        "timestamp": interaction.timestamp,
    });
    let fields = value.as_object_mut()?;
    match strategy {
        InteractionCacheStrategy::None => return None,
        InteractionCacheStrategy::ResponseOnly => {}
        InteractionCacheStrategy::WithContext => {
            fields.insert("sessionId".to_string(), json!(interaction.session_id));
            fields.insert("request".to_string(), json!(interaction.request));
            fields.insert("context".to_string(), Value::Object(interaction.context.clone()));
        }
        InteractionCacheStrategy::FullInteraction => {
            fields.insert("sessionId".to_string(), json!(interaction.session_id));
            fields.insert("request".to_string(), json!(interaction.request));
            fields.insert("context".to_string(), Value::Object(interaction.context.clone()));
            fields.insert("metadata".to_string(), Value::Object(interaction.metadata.clone()));
            fields.insert("processingTime".to_string(), json!(interaction.processing_time_ms));
        }
    }
    Some(value)
}

// ============================================================================
// SERVICE
// ============================================================================

/// Outcome of a persistence call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_result: Option<SyncResult>,
    pub timestamp: Timestamp,
}

impl PersistenceResult {
    pub fn success(message: impl Into<String>, sync_result: Option<SyncResult>) -> Self {
        Self {
            success: true,
            message: message.into(),
            sync_result,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            sync_result: None,
            timestamp: Utc::now(),
        }
    }
}

/// Entity an evaluation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationTarget {
    Session,
    Interaction,
}

impl EvaluationTarget {
    fn collection(&self) -> &'static str {
        match self {
            Self::Session => SESSIONS_COLLECTION,
            Self::Interaction => INTERACTIONS_COLLECTION,
        }
    }
}

impl FromStr for EvaluationTarget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "interaction" => Ok(Self::Interaction),
            other => Err(ValidationError::InvalidValue {
                field: "entity_type".to_string(),
                reason: format!("must be 'session' or 'interaction', got '{}'", other),
            }),
        }
    }
}

/// Saves conversation documents and caches projections of them.
pub struct MultiTierPersistence {
    cache: Arc<dyn CacheStore>,
    documents: Arc<dyn DocumentStore>,
    synchronizer: Arc<HybridSynchronizer>,
}

impl MultiTierPersistence {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        documents: Arc<dyn DocumentStore>,
        synchronizer: Arc<HybridSynchronizer>,
    ) -> Self {
        Self {
            cache,
            documents,
            synchronizer,
        }
    }

    pub async fn persist_session(
        &self,
        session: &Session,
        strategy: SessionCacheStrategy,
    ) -> PersistenceResult {
        tracing::debug!(session_id = %session.session_id, strategy = strategy.as_str(), "Persisting session");

        let save = self.save_document(SESSIONS_COLLECTION, &session.session_id, session);
        let cache = async {
            let Some(value) = session_cache_value(session, strategy) else {
                return Ok(None);
            };
            let write = KvWrite {
                key: format!("{}{}", SESSION_KEY_PREFIX, session.session_id),
                value: value.to_string(),
                ttl_secs: strategy.ttl_secs().map(|t| t as i64),
                session_id: Some(session.session_id.clone()),
                interaction_id: None,
            };
            self.cache_and_sync(write).await.map(Some)
        };

        match tokio::join!(save, cache) {
            (Ok(()), Ok(sync)) => PersistenceResult::success("Session persisted successfully", sync),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(session_id = %session.session_id, error = %e, "Session persistence failed");
                PersistenceResult::failure(format!("Session persistence failed: {}", e))
            }
        }
    }

    pub async fn persist_interaction(
        &self,
        interaction: &Interaction,
        strategy: InteractionCacheStrategy,
    ) -> PersistenceResult {
        tracing::debug!(
            interaction_id = %interaction.interaction_id,
            strategy = strategy.as_str(),
            "Persisting interaction"
        );

        let save = self.save_document(
            INTERACTIONS_COLLECTION,
            &interaction.interaction_id,
            interaction,
        );
        let cache = async {
            let Some(value) = interaction_cache_value(interaction, strategy) else {
                return Ok(None);
            };
            let write = KvWrite {
                key: format!("{}{}", INTERACTION_KEY_PREFIX, interaction.interaction_id),
                value: value.to_string(),
                ttl_secs: strategy.ttl_secs().map(|t| t as i64),
                session_id: interaction.session_id.clone(),
                interaction_id: Some(interaction.interaction_id.clone()),
            };
            self.cache_and_sync(write).await.map(Some)
        };

        match tokio::join!(save, cache) {
            (Ok(()), Ok(sync)) => {
                PersistenceResult::success("Interaction persisted successfully", sync)
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(
                    interaction_id = %interaction.interaction_id,
                    error = %e,
                    "Interaction persistence failed"
                );
                PersistenceResult::failure(format!("Interaction persistence failed: {}", e))
            }
        }
    }

    /// Stamp evaluation data on an existing session or interaction document.
    ///
    /// An unknown `entity_type` is rejected before any I/O. A missing entity
    /// or a store failure yields a failed result.
    pub async fn persist_evaluation(
        &self,
        entity_id: &str,
        entity_type: &str,
        evaluation: Map<String, Value>,
    ) -> KvShadowResult<PersistenceResult> {
        let target: EvaluationTarget = entity_type.parse()?;
        let collection = target.collection();

        let result = async {
            let Some(mut doc) = self.documents.find_by_id(collection, entity_id).await? else {
                return Ok::<_, kvshadow_core::KvShadowError>(false);
            };
            if let Some(fields) = doc.as_object_mut() {
                fields.insert("evaluationData".to_string(), Value::Object(evaluation));
                fields.insert("evaluatedAt".to_string(), json!(Utc::now()));
            }
            self.documents.save(collection, entity_id, doc).await?;
            Ok(true)
        }
        .await;

        Ok(match result {
            Ok(true) => PersistenceResult::success("Evaluation persisted successfully", None),
            Ok(false) => PersistenceResult::failure(format!(
                "No {} found with id {}",
                entity_type, entity_id
            )),
            Err(e) => {
                tracing::error!(entity_type, entity_id, error = %e, "Evaluation persistence failed");
                PersistenceResult::failure(format!("Evaluation persistence failed: {}", e))
            }
        })
    }

    async fn save_document<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        entity: &T,
    ) -> KvShadowResult<()> {
        let doc =
            serde_json::to_value(entity).map_err(|e| StorageError::serialization(collection, e))?;
        self.documents.save(collection, id, doc).await
    }

    async fn cache_and_sync(&self, write: KvWrite) -> KvShadowResult<SyncResult> {
        let ttl = normalize_ttl(write.ttl_secs).map(Duration::from_secs);
        self.cache.set(&write.key, &write.value, ttl).await?;
        Ok(self.synchronizer.adaptive_sync(write).await)
    }
}
