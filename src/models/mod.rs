//! Request and Response models for the admin API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request parameters and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::PurgeRequest;
pub use responses::{HealthResponse, KeyInfo, KeysResponse, PurgeResponse, StatsResponse};
