//! Cache boundary and the in-memory reference driver.

pub mod memory;
pub mod traits;

pub use memory::InMemoryCacheStore;
pub use traits::{CacheStats, CacheStore};
