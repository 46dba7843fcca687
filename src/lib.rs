//! Mini LRU Cache - An in-process cache with single-flight computation
//!
//! Provides a size-bounded LRU cache with TTL expiration that computes each
//! missing value once, however many callers ask for it concurrently, plus an
//! axum middleware that caches HTTP responses with it.

pub mod api;
pub mod cache;
pub mod caching;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::{Cache, CacheStats, Computed};
pub use caching::{cache_responses, ResponseCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_sweep_task;
