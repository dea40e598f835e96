//! Document store boundary and the in-memory reference driver.

pub mod memory;
pub mod traits;

pub use memory::InMemoryDocumentStore;
pub use traits::DocumentStore;
