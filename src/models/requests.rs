//! Request DTOs for the admin API
//!
//! Defines the structure of incoming query parameters.

use serde::Deserialize;

/// Query parameters for the purge operation (DELETE /_cache/entries)
///
/// # Fields
/// - `uri`: Path and query of the cached `GET` response to drop
#[derive(Debug, Clone, Deserialize)]
pub struct PurgeRequest {
    pub uri: String,
}

impl PurgeRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.uri.is_empty() {
            return Some("uri cannot be empty".to_string());
        }
        if !self.uri.starts_with('/') {
            return Some("uri must start with '/'".to_string());
        }
        None
    }
}
