//! Cached Response
//!
//! A fully buffered HTTP response that can be stored in the cache and
//! replayed to any number of clients.

use std::time::Duration;

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    http::{header::EXPIRES, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};

/// Header telling clients whether the response was served from the cache.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

fn parse_expires(value: &HeaderValue) -> Option<DateTime<Utc>> {
    let value = value.to_str().ok()?;
    httpdate::parse_http_date(value).ok().map(DateTime::<Utc>::from)
}

// == Cached Response ==
/// Snapshot of an upstream response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// When the upstream response was produced
    pub fetched_at: DateTime<Utc>,
}

impl CachedResponse {
    // == Buffer ==
    /// Reads the whole body of `response` into memory.
    pub async fn buffer(response: Response) -> anyhow::Result<Self> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .context("failed to buffer upstream response body")?;

        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
            fetched_at: Utc::now(),
        })
    }

    // == Time To Live ==
    /// Returns how long this response stays fresh.
    ///
    /// An `Expires` header wins over `default_ttl`. Any of the three HTTP
    /// date formats is accepted. A date in the past, or a value that is not
    /// a date at all (such as `0`), yields zero.
    pub fn ttl(&self, default_ttl: Duration, now: DateTime<Utc>) -> Duration {
        let Some(expires) = self.headers.get(EXPIRES) else {
            return default_ttl;
        };
        match parse_expires(expires) {
            Some(expires) => (expires - now).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }

    /// Cost of this response in the cache: its body length in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
    }

    // == Replay ==
    /// Rebuilds a response, tagged with `cache_status` in `x-cache`.
    pub fn replay(self, cache_status: &'static str) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static(cache_status));
        response
    }
}
