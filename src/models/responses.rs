//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::caching::CachedResponse;

/// Response body for the stats endpoint (GET /_cache/stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Raw counters and memory accounting
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Share of lookups that did not run a computation
    pub hit_rate: f64,
}

impl StatsResponse {
    /// Creates a new StatsResponse from cache statistics
    pub fn new(stats: CacheStats) -> Self {
        let hit_rate = stats.hit_rate();
        Self { stats, hit_rate }
    }
}

/// One cached response as listed by GET /_cache/keys
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub key: String,
    /// HTTP status of the cached response
    pub status: u16,
    /// Body size in bytes
    pub size: usize,
    /// When the response was produced, in RFC 3339 format
    pub fetched_at: String,
}

impl KeyInfo {
    pub fn new(key: impl Into<String>, response: &CachedResponse) -> Self {
        Self {
            key: key.into(),
            status: response.status.as_u16(),
            size: response.size(),
            fetched_at: response.fetched_at.to_rfc3339(),
        }
    }
}

/// Response body for the keys endpoint (GET /_cache/keys)
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub count: usize,
    pub entries: Vec<KeyInfo>,
}

impl KeysResponse {
    /// Creates a new KeysResponse, sorted by key
    pub fn new(mut entries: Vec<KeyInfo>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            count: entries.len(),
            entries,
        }
    }
}

/// Response body for the purge operation (DELETE /_cache/entries)
#[derive(Debug, Clone, Serialize)]
pub struct PurgeResponse {
    /// The cache key derived from the request
    pub key: String,
    /// Whether an entry was removed
    pub purged: bool,
}

impl PurgeResponse {
    pub fn new(key: impl Into<String>, purged: bool) -> Self {
        Self {
            key: key.into(),
            purged,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
