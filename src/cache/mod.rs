//! Cache Module
//!
//! Provides an in-process cache with TTL expiration, size-bounded LRU
//! eviction and single-flight computation of missing values.

mod entry;
mod flight;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use entry::Computed;
pub use stats::CacheStats;
pub use store::Cache;
