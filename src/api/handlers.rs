//! API Handlers
//!
//! HTTP request handlers for the admin and diagnostic endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use tracing::info;

use crate::cache::Cache;
use crate::caching::{CachedResponse, ResponseCache};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    HealthResponse, KeyInfo, KeysResponse, PurgeRequest, PurgeResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Response cache shared with the caching middleware
    pub responses: ResponseCache,
    /// Directory served behind the cache
    pub assets_dir: PathBuf,
}

impl AppState {
    /// Creates a new AppState around an existing response cache.
    pub fn new(responses: ResponseCache, assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            responses,
            assets_dir: assets_dir.into(),
        }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> Self {
        let responses = ResponseCache::new(config.max_memory, config.default_ttl());
        Self::new(responses, config.assets_dir.clone())
    }

    pub fn cache(&self) -> &Arc<Cache<CachedResponse>> {
        self.responses.cache()
    }
}

/// Handler for GET /_cache/stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(state.cache().stats()))
}

/// Handler for GET /_cache/keys
///
/// Lists the cached responses. Listing purges stale entries and checks the
/// cache's internal consistency, so it holds the cache lock for a full pass
/// and runs on the blocking pool.
pub async fn keys_handler(State(state): State<AppState>) -> Result<Json<KeysResponse>> {
    let cache = Arc::clone(state.cache());

    let entries = tokio::task::spawn_blocking(move || {
        let mut entries = Vec::new();
        cache.keys(|key, response| entries.push(KeyInfo::new(key, response)));
        entries
    })
    .await
    .map_err(|err| CacheError::Internal(format!("key listing did not complete: {err}")))?;

    Ok(Json(KeysResponse::new(entries)))
}

/// Handler for DELETE /_cache/entries?uri=/path
///
/// Drops the cached `GET` response for `uri`.
pub async fn purge_handler(
    State(state): State<AppState>,
    Query(req): Query<PurgeRequest>,
) -> Result<Json<PurgeResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let key = format!("GET {}", req.uri);
    let purged = state.cache().try_del(&key)?;
    if purged {
        info!(key = %key, "cached response purged");
    }

    Ok(Json(PurgeResponse::new(key, purged)))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
