//! Response Caching Module
//!
//! Adapts the cache engine to HTTP: turns `GET` requests into keys and
//! upstream responses into sized, expiring cache values.

mod middleware;
mod response;

pub use middleware::{cache_key, cache_responses, ResponseCache};
pub use response::{CachedResponse, X_CACHE};
