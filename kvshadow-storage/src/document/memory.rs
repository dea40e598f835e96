//! In-memory document driver.

use async_trait::async_trait;
use kvshadow_core::{DocumentQuery, FilterExpr, KvShadowResult, StorageError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::traits::DocumentStore;

type Collection = BTreeMap<String, Value>;

/// Document store backed by a map of collections.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> KvShadowResult<()> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StorageError::WriteFailed {
                store: collection.to_string(),
                reason: format!("duplicate id {}", id),
            }
            .into());
        }
        docs.insert(id.to_string(), doc);
        Ok(())
    }

    async fn save(&self, collection: &str, id: &str, doc: Value) -> KvShadowResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> KvShadowResult<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn find(&self, collection: &str, query: &DocumentQuery) -> KvShadowResult<Vec<Value>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<&Value> = docs.values().filter(|d| query.matches(d)).collect();
        if !query.sort.is_empty() {
            matched.sort_by(|a, b| query.compare(a, b));
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(query.skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> KvShadowResult<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .is_some_and(|c| c.remove(id).is_some()))
    }

    async fn count(&self, collection: &str, filters: &[FilterExpr]) -> KvShadowResult<u64> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map_or(0, |docs| {
            docs.values()
                .filter(|d| filters.iter().all(|f| f.matches(d)))
                .count() as u64
        }))
    }
}
