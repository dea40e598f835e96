//! Shadow record repository.

use async_trait::async_trait;
use kvshadow_core::constants::SHADOW_COLLECTION;
use kvshadow_core::{
    DocumentQuery, FilterExpr, KvShadowResult, ShadowRecord, StorageError,
};
use serde_json::Value;
use std::sync::Arc;

use crate::document::DocumentStore;

/// Durable store of shadow records, keyed by cache key.
#[async_trait]
pub trait ShadowStore: Send + Sync {
    async fn get(&self, key: &str) -> KvShadowResult<Option<ShadowRecord>>;

    /// Create or replace the record for `record.key`.
    async fn upsert(&self, record: &ShadowRecord) -> KvShadowResult<()>;

    /// Remove the record. Returns true if it existed.
    async fn delete(&self, key: &str) -> KvShadowResult<bool>;

    /// Up to `limit` records with keys strictly after `after_key`, ordered by key.
    async fn scan_page(&self, after_key: Option<&str>, limit: usize) -> KvShadowResult<ShadowPage>;

    async fn count(&self) -> KvShadowResult<u64>;
}

/// One page of a key-ordered shadow scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadowPage {
    pub records: Vec<ShadowRecord>,
    /// Cursor for the next page, `None` once the scan is exhausted.
    pub next_after: Option<String>,
    /// Documents in this page that could not be decoded.
    pub skipped: u64,
}

/// [`ShadowStore`] persisted as documents in the `kvshadow` collection,
/// with the cache key as document id.
pub struct DocumentShadowStore<D: ?Sized> {
    documents: Arc<D>,
    collection: String,
}

impl<D: DocumentStore + ?Sized> DocumentShadowStore<D> {
    pub fn new(documents: Arc<D>) -> Self {
        Self::with_collection(documents, SHADOW_COLLECTION)
    }

    pub fn with_collection(documents: Arc<D>, collection: impl Into<String>) -> Self {
        Self {
            documents,
            collection: collection.into(),
        }
    }

    fn decode(&self, doc: Value) -> KvShadowResult<ShadowRecord> {
        serde_json::from_value(doc)
            .map_err(|e| StorageError::serialization(&self.collection, e).into())
    }
}

#[async_trait]
impl<D: DocumentStore + ?Sized> ShadowStore for DocumentShadowStore<D> {
    async fn get(&self, key: &str) -> KvShadowResult<Option<ShadowRecord>> {
        match self.documents.find_by_id(&self.collection, key).await? {
            Some(doc) => Ok(Some(self.decode(doc)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &ShadowRecord) -> KvShadowResult<()> {
        let doc = serde_json::to_value(record)
            .map_err(|e| StorageError::serialization(&self.collection, e))?;
        self.documents.save(&self.collection, &record.key, doc).await
    }

    async fn delete(&self, key: &str) -> KvShadowResult<bool> {
        self.documents.delete_by_id(&self.collection, key).await
    }

    async fn scan_page(&self, after_key: Option<&str>, limit: usize) -> KvShadowResult<ShadowPage> {
        let mut query = DocumentQuery::new().sort_asc("key").limit(limit);
        if let Some(after) = after_key {
            query = query.filter(FilterExpr::gt("key", Value::String(after.to_string())));
        }
        let docs = self.documents.find(&self.collection, &query).await?;
        let full_page = limit > 0 && docs.len() == limit;

        // The cursor follows raw documents so a corrupt record cannot stall the scan.
        let mut page = ShadowPage::default();
        let mut last_key = None;
        for doc in docs {
            if let Some(key) = doc.get("key").and_then(Value::as_str) {
                last_key = Some(key.to_string());
            }
            match self.decode(doc) {
                Ok(record) => page.records.push(record),
                Err(e) => {
                    page.skipped += 1;
                    tracing::warn!(collection = %self.collection, error = %e, "Skipping undecodable shadow record");
                }
            }
        }
        page.next_after = if full_page { last_key } else { None };
        Ok(page)
    }

    async fn count(&self) -> KvShadowResult<u64> {
        self.documents.count(&self.collection, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocumentStore;
    use kvshadow_core::ShadowMetadata;

    fn store() -> (Arc<InMemoryDocumentStore>, DocumentShadowStore<InMemoryDocumentStore>) {
        let docs = Arc::new(InMemoryDocumentStore::new());
        (Arc::clone(&docs), DocumentShadowStore::new(docs))
    }

    #[tokio::test]
    async fn test_upsert_get_delete() {
        let (_, shadows) = store();
        let record = ShadowRecord::new("user:42", "alice", 1, ShadowMetadata::direct(None));
        shadows.upsert(&record).await.unwrap();
        assert_eq!(shadows.get("user:42").await.unwrap(), Some(record));
        assert!(shadows.delete("user:42").await.unwrap());
        assert_eq!(shadows.get("user:42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_page_walks_keys_in_order() {
        let (_, shadows) = store();
        for key in ["c", "a", "e", "b", "d"] {
            let record = ShadowRecord::new(key, "v", 0, ShadowMetadata::direct(None));
            shadows.upsert(&record).await.unwrap();
        }

        let first = shadows.scan_page(None, 2).await.unwrap();
        let keys: Vec<_> = first.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(first.next_after.as_deref(), Some("b"));

        let second = shadows.scan_page(Some("b"), 2).await.unwrap();
        let keys: Vec<_> = second.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);

        let last = shadows.scan_page(Some("d"), 2).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert_eq!(last.next_after, None);
        assert!(shadows.scan_page(Some("e"), 2).await.unwrap().records.is_empty());
        assert_eq!(shadows.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_undecodable_documents_are_skipped_in_scans() {
        let (docs, shadows) = store();
        docs.save(SHADOW_COLLECTION, "bad", serde_json::json!({ "key": "bad" }))
            .await
            .unwrap();
        let record = ShadowRecord::new("good", "v", 0, ShadowMetadata::direct(None));
        shadows.upsert(&record).await.unwrap();

        let page = shadows.scan_page(None, 10).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.skipped, 1);

        // A page made only of corrupt records still advances the cursor.
        let page = shadows.scan_page(None, 1).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_after.as_deref(), Some("bad"));
        assert!(shadows.get("bad").await.is_err());
    }
}
