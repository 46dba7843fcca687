//! Maintenance Sweep Task
//!
//! Background task that periodically purges stale cache entries and checks
//! the cache's internal consistency.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::Cache;

/// Spawns a background task that periodically sweeps `cache`.
///
/// Each run calls [`Cache::keys`] on the blocking pool, which drops every
/// stale entry and panics if the cache is corrupt.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(Cache::<String>::new(1024));
/// let sweep_handle = spawn_sweep_task(cache.clone(), Duration::from_secs(30));
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task<V>(cache: Arc<Cache<V>>, interval: Duration) -> JoinHandle<()>
where
    V: Send + 'static,
{
    tokio::spawn(async move {
        info!(
            "Starting cache sweep task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let cache = Arc::clone(&cache);
            let sweep = tokio::task::spawn_blocking(move || cache.keys(|_, _| {})).await;

            match sweep {
                Ok(0) => debug!("Cache sweep: no stale entries found"),
                Ok(purged) => info!("Cache sweep: purged {} stale entries", purged),
                Err(err) => {
                    error!(error = %err, "Cache sweep did not complete, stopping sweep task");
                    return;
                }
            }
        }
    })
}
