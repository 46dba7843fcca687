//! API Module
//!
//! Admin handlers and routing for the caching server.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /_cache/stats` - Cache statistics
//! - `GET /_cache/keys` - List cached responses
//! - `DELETE /_cache/entries?uri=/path` - Purge a cached response

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
