//! kvshadow Storage - driver boundaries and repositories
//!
//! The engine talks to two external stores: a TTL-capable key-value cache
//! ([`CacheStore`]) and a durable document store ([`DocumentStore`]). Shadow
//! records and the outbox log are repositories layered over the document
//! store ([`DocumentShadowStore`], [`DocumentOutboxStore`]).
//!
//! The in-memory drivers are complete implementations of both boundaries,
//! used by tests and by embedders that do not need durability.

pub mod cache;
pub mod document;
pub mod outbox;
pub mod shadow;

pub use cache::{CacheStats, CacheStore, InMemoryCacheStore};
pub use document::{DocumentStore, InMemoryDocumentStore};
pub use outbox::{DocumentOutboxStore, OutboxStore};
pub use shadow::{DocumentShadowStore, ShadowPage, ShadowStore};
