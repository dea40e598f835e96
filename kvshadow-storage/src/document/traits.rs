//! Document store boundary.

use async_trait::async_trait;
use kvshadow_core::{DocumentQuery, FilterExpr, KvShadowResult};
use serde_json::Value;

/// Durable, per-collection document driver consumed by the engine.
///
/// Each document write is assumed atomic and crash-consistent. The engine
/// never relies on multi-document transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Fails if the id is already taken.
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> KvShadowResult<()>;

    /// Insert or replace a document.
    async fn save(&self, collection: &str, id: &str, doc: Value) -> KvShadowResult<()>;

    async fn find_by_id(&self, collection: &str, id: &str) -> KvShadowResult<Option<Value>>;

    /// Documents matching the query, in query order.
    async fn find(&self, collection: &str, query: &DocumentQuery) -> KvShadowResult<Vec<Value>>;

    /// Every document in the collection. Unbounded; prefer [`find`](Self::find) with a limit.
    async fn find_all(&self, collection: &str) -> KvShadowResult<Vec<Value>> {
        self.find(collection, &DocumentQuery::new()).await
    }

    /// Delete a document. Returns true if it existed.
    async fn delete_by_id(&self, collection: &str, id: &str) -> KvShadowResult<bool>;

    /// Count documents matching every filter (all documents if empty).
    async fn count(&self, collection: &str, filters: &[FilterExpr]) -> KvShadowResult<u64>;
}
