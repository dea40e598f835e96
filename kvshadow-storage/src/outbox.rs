//! Outbox log repository.

use async_trait::async_trait;
use kvshadow_core::constants::OUTBOX_COLLECTION;
use kvshadow_core::{
    DocumentQuery, EventId, FilterExpr, KvShadowResult, OutboxEvent, StorageError, Timestamp,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::document::DocumentStore;

/// Durable, append-only log of pending shadow mutations.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn append(&self, event: &OutboxEvent) -> KvShadowResult<()>;

    async fn get(&self, id: EventId) -> KvShadowResult<Option<OutboxEvent>>;

    /// Up to `limit` unprocessed events, oldest first by `(created_at, id)`.
    async fn fetch_unprocessed(&self, limit: usize) -> KvShadowResult<Vec<OutboxEvent>>;

    /// Flip the processed flag. A no-op for events already processed.
    async fn mark_processed(&self, id: EventId, at: Timestamp) -> KvShadowResult<()>;

    async fn count_unprocessed(&self) -> KvShadowResult<u64>;

    async fn count_total(&self) -> KvShadowResult<u64>;
}

/// [`OutboxStore`] persisted as documents in the `outbox` collection.
pub struct DocumentOutboxStore<D: ?Sized> {
    documents: Arc<D>,
    collection: String,
}

impl<D: DocumentStore + ?Sized> DocumentOutboxStore<D> {
    pub fn new(documents: Arc<D>) -> Self {
        Self::with_collection(documents, OUTBOX_COLLECTION)
    }

    pub fn with_collection(documents: Arc<D>, collection: impl Into<String>) -> Self {
        Self {
            documents,
            collection: collection.into(),
        }
    }

    fn decode(&self, doc: Value) -> KvShadowResult<OutboxEvent> {
        serde_json::from_value(doc)
            .map_err(|e| StorageError::serialization(&self.collection, e).into())
    }

    fn encode(&self, event: &OutboxEvent) -> KvShadowResult<Value> {
        serde_json::to_value(event)
            .map_err(|e| StorageError::serialization(&self.collection, e).into())
    }

    fn unprocessed() -> FilterExpr {
        FilterExpr::eq("processed", json!(false))
    }
}

#[async_trait]
impl<D: DocumentStore + ?Sized> OutboxStore for DocumentOutboxStore<D> {
    async fn append(&self, event: &OutboxEvent) -> KvShadowResult<()> {
        let doc = self.encode(event)?;
        self.documents
            .insert(&self.collection, &event.id.to_string(), doc)
            .await
    }

    async fn get(&self, id: EventId) -> KvShadowResult<Option<OutboxEvent>> {
        match self
            .documents
            .find_by_id(&self.collection, &id.to_string())
            .await?
        {
            Some(doc) => Ok(Some(self.decode(doc)?)),
            None => Ok(None),
        }
    }

    async fn fetch_unprocessed(&self, limit: usize) -> KvShadowResult<Vec<OutboxEvent>> {
        let mut events = Vec::new();
        let mut offset = 0usize;
        // Undecodable rows stay unprocessed, so later pages step past them
        // instead of letting them fill every batch.
        while events.len() < limit {
            let wanted = limit - events.len();
            let query = DocumentQuery::new()
                .filter(Self::unprocessed())
                .sort_asc("ts")
                .sort_asc("id")
                .skip(offset)
                .limit(wanted);
            let docs = self.documents.find(&self.collection, &query).await?;
            let page_len = docs.len();
            offset = offset.saturating_add(page_len);

            for doc in docs {
                match self.decode(doc) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        tracing::warn!(collection = %self.collection, error = %e, "Skipping undecodable outbox event");
                    }
                }
            }
            if page_len < wanted {
                break;
            }
        }
        Ok(events)
    }

    async fn mark_processed(&self, id: EventId, at: Timestamp) -> KvShadowResult<()> {
        let id_str = id.to_string();
        let Some(doc) = self.documents.find_by_id(&self.collection, &id_str).await? else {
            return Err(StorageError::NotFound {
                collection: self.collection.clone(),
                id: id_str,
            }
            .into());
        };
        let mut event = self.decode(doc)?;
        if event.processed {
            return Ok(());
        }
        event.mark_processed(at);
        let doc = self.encode(&event)?;
        self.documents.save(&self.collection, &id_str, doc).await
    }

    async fn count_unprocessed(&self) -> KvShadowResult<u64> {
        self.documents
            .count(&self.collection, &[Self::unprocessed()])
            .await
    }

    async fn count_total(&self) -> KvShadowResult<u64> {
        self.documents.count(&self.collection, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocumentStore;
    use chrono::{Duration, Utc};
    use kvshadow_core::{OutboxEventKind, OutboxPayload};

    fn store() -> (Arc<InMemoryDocumentStore>, DocumentOutboxStore<InMemoryDocumentStore>) {
        let docs = Arc::new(InMemoryDocumentStore::new());
        (Arc::clone(&docs), DocumentOutboxStore::new(docs))
    }

    #[tokio::test]
    async fn test_append_and_get() {
        let (_, outbox) = store();
        let event = OutboxEvent::key_mutated(&OutboxPayload::set("k", "v", None));
        outbox.append(&event).await.unwrap();
        assert_eq!(outbox.get(event.id).await.unwrap(), Some(event.clone()));
        assert!(outbox.append(&event).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_unprocessed_oldest_first() {
        let (_, outbox) = store();
        let base = Utc::now();
        let mut ids = Vec::new();
        // Appended newest first to prove ordering comes from timestamps.
        for offset in [3, 1, 2, 0] {
            let mut event = OutboxEvent::key_mutated(&OutboxPayload::set(
                format!("k{}", offset),
                "v",
                None,
            ));
            event.created_at = base + Duration::milliseconds(offset);
            outbox.append(&event).await.unwrap();
            ids.push((offset, event.id));
        }
        ids.sort();

        let fetched = outbox.fetch_unprocessed(3).await.unwrap();
        let fetched_ids: Vec<_> = fetched.iter().map(|e| e.id).collect();
        let expected: Vec<_> = ids.iter().take(3).map(|(_, id)| *id).collect();
        assert_eq!(fetched_ids, expected);
    }

    #[tokio::test]
    async fn test_mark_processed_is_idempotent() {
        let (_, outbox) = store();
        let event = OutboxEvent::key_mutated(&OutboxPayload::tombstone("k"));
        outbox.append(&event).await.unwrap();
        assert_eq!(outbox.count_unprocessed().await.unwrap(), 1);

        let first = Utc::now();
        outbox.mark_processed(event.id, first).await.unwrap();
        outbox
            .mark_processed(event.id, first + Duration::seconds(5))
            .await
            .unwrap();

        let stored = outbox.get(event.id).await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.processed_at, Some(first));
        assert_eq!(outbox.count_unprocessed().await.unwrap(), 0);
        assert_eq!(outbox.count_total().await.unwrap(), 1);
        assert!(outbox.fetch_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_processed_unknown_id() {
        let (_, outbox) = store();
        let err = outbox
            .mark_processed(kvshadow_core::new_event_id(), Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_undecodable_rows_do_not_block_fetch() {
        let (docs, outbox) = store();
        for id in ["bad-1", "bad-2", "bad-3"] {
            docs.insert(
                OUTBOX_COLLECTION,
                id,
                json!({ "type": "KVMutated", "ts": "2020-01-01T00:00:00Z", "processed": false, "payload": {} }),
            )
            .await
            .unwrap();
        }
        let good = OutboxEvent::key_mutated(&OutboxPayload::set("k", "v", None));
        outbox.append(&good).await.unwrap();

        let fetched = outbox.fetch_unprocessed(2).await.unwrap();
        assert_eq!(fetched, vec![good.clone()]);
        assert_eq!(outbox.count_unprocessed().await.unwrap(), 4);

        outbox.mark_processed(good.id, Utc::now()).await.unwrap();
        assert!(outbox.fetch_unprocessed(2).await.unwrap().is_empty());
        assert_eq!(outbox.count_unprocessed().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_kinds_round_trip() {
        let (_, outbox) = store();
        let event = OutboxEvent::with_raw_payload(
            OutboxEventKind::Unknown("SessionClosed".to_string()),
            json!({ "sessionId": "s1" }),
        );
        outbox.append(&event).await.unwrap();
        let fetched = outbox.fetch_unprocessed(10).await.unwrap();
        assert_eq!(fetched, vec![event]);
    }
}
