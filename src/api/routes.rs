//! API Routes
//!
//! Configures the Axum router: admin endpoints up front, cached static
//! assets behind them.

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use super::handlers::{health_handler, keys_handler, purge_handler, stats_handler, AppState};
use crate::caching::cache_responses;

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /_cache/stats` - Cache statistics
/// - `GET /_cache/keys` - List cached responses
/// - `DELETE /_cache/entries?uri=/path` - Purge one cached response
/// - anything else - Static files from the assets directory, cached
///
/// The admin endpoints sit outside the caching middleware.
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let assets = Router::new()
        .fallback_service(ServeDir::new(&state.assets_dir))
        .layer(middleware::from_fn_with_state(
            state.responses.clone(),
            cache_responses,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/_cache/stats", get(stats_handler))
        .route("/_cache/keys", get(keys_handler))
        .route("/_cache/entries", delete(purge_handler))
        .fallback_service(assets)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
