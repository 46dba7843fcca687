//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Budget for cached response bodies, in bytes
    pub max_memory: usize,
    /// TTL in seconds for responses without an `Expires` header
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Interval in seconds between maintenance sweeps
    pub sweep_interval: u64,
    /// Directory of static assets served behind the cache
    pub assets_dir: PathBuf,
}

const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;
const DEFAULT_TTL: u64 = 300;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SWEEP_INTERVAL: u64 = 30;
const DEFAULT_ASSETS_DIR: &str = "./public";

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_MEMORY` - Cache budget in bytes (default: 64 MiB)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `SWEEP_INTERVAL` - Maintenance sweep frequency in seconds (default: 30)
    /// - `ASSETS_DIR` - Static asset directory (default: ./public)
    pub fn from_env() -> Self {
        Self {
            max_memory: parse_var("MAX_MEMORY", DEFAULT_MAX_MEMORY),
            default_ttl: parse_var("DEFAULT_TTL", DEFAULT_TTL),
            server_port: parse_var("SERVER_PORT", DEFAULT_PORT),
            sweep_interval: parse_var("SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL),
            assets_dir: env::var_os("ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSETS_DIR)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }
}

/// Reads `name`, falling back to `default` when unset or unparseable.
fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_MAX_MEMORY,
            default_ttl: DEFAULT_TTL,
            server_port: DEFAULT_PORT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            assets_dir: PathBuf::from(DEFAULT_ASSETS_DIR),
        }
    }
}
