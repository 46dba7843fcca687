//! Response Caching Middleware
//!
//! Serves `GET` requests from a [`Cache`] of buffered responses. The request
//! method and target (path and query) form the key, so this layer must not
//! front handlers whose responses depend on cookies or request headers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{Method, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::error;

use crate::cache::{Cache, Computed};
use crate::caching::CachedResponse;
use crate::error::CacheError;

// == Response Cache ==
/// Shared response cache plus the TTL used when upstream sets no `Expires`.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    cache: Arc<Cache<CachedResponse>>,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Creates a cache holding at most `max_memory` bytes of response bodies.
    pub fn new(max_memory: usize, default_ttl: Duration) -> Self {
        Self {
            cache: Arc::new(Cache::new(max_memory)),
            default_ttl,
        }
    }

    pub fn cache(&self) -> &Arc<Cache<CachedResponse>> {
        &self.cache
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

// == Cache Key ==
/// Builds the key for a request from its method and target only.
pub fn cache_key(method: &Method, uri: &Uri) -> String {
    let target = uri.path_and_query().map_or("/", |target| target.as_str());
    format!("{method} {target}")
}

// == Middleware ==
/// Answers `GET` requests from the cache, running the rest of the stack at
/// most once per key while the cached copy is missing or stale. Other
/// methods pass straight through.
///
/// Requests that find the key in flight await it without holding a thread.
/// The lookup runs in its own task, so a client that disconnects does not
/// cancel a computation other requests are waiting on.
pub async fn cache_responses(
    State(responses): State<ResponseCache>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = cache_key(request.method(), request.uri());
    let cache = Arc::clone(&responses.cache);
    let default_ttl = responses.default_ttl;

    let lookup = tokio::spawn(async move {
        let mut computed_here = false;
        let response = cache
            .get_async(&key, || {
                computed_here = true;
                fetch(request, next, default_ttl)
            })
            .await?;
        Ok::<_, CacheError>((response, computed_here))
    })
    .await;

    match lookup {
        Ok(Ok((response, true))) => response.replay("MISS"),
        Ok(Ok((response, false))) => response.replay("HIT"),
        Ok(Err(err)) => err.into_response(),
        Err(join_error) => {
            error!(error = %join_error, "response cache lookup did not complete");
            CacheError::Internal("response cache lookup did not complete".to_string())
                .into_response()
        }
    }
}

// == Fetch ==
/// Runs the inner stack and turns its response into a cacheable value.
async fn fetch(
    request: Request,
    next: Next,
    default_ttl: Duration,
) -> anyhow::Result<Computed<CachedResponse>> {
    let response = next.run(request).await;
    let cached = CachedResponse::buffer(response).await?;
    let ttl = cached.ttl(default_ttl, Utc::now());
    let size = cached.size();

    Ok(Computed::new(cached, ttl, size))
}
