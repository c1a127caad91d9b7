//! TTL Cleanup Task
//!
//! Background task that periodically sweeps expired entries from a cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ObjectCache;

/// Spawns a task that calls [`ObjectCache::cleanup_expired_entries`] every
/// `interval`.
///
/// The task runs until aborted through the returned handle. A failed sweep is
/// logged and retried on the next tick.
///
/// # Example
/// ```ignore
/// let cache: Arc<dyn ObjectCache> = Arc::new(MemoryStore::new(CacheConfig::default()));
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<dyn ObjectCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            backend = cache.backend_type(),
            interval_ms = interval.as_millis() as u64,
            "starting TTL cleanup task"
        );

        loop {
            tokio::time::sleep(interval).await;

            match cache.cleanup_expired_entries().await {
                Ok(0) => debug!(backend = cache.backend_type(), "TTL cleanup: nothing expired"),
                Ok(removed) => info!(
                    backend = cache.backend_type(),
                    removed, "TTL cleanup: removed expired entries"
                ),
                Err(e) => warn!(
                    backend = cache.backend_type(),
                    error = %e,
                    "TTL cleanup failed"
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::config::CacheConfig;

    fn memory_cache() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(CacheConfig::default().with_max_size(1024)))
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let cache = memory_cache();
        cache
            .store_data("expire_soon", b"value".to_vec(), Some(Duration::from_millis(50)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(350)).await;

        // len counts expired entries, so only the sweep can have emptied it
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.size().await, 0);
        assert_eq!(cache.statistics().await.expirations, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let cache = memory_cache();
        cache
            .store_data("long_lived", b"value".to_vec(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(
            cache.retrieve_data("long_lived").await.unwrap(),
            Some(b"value".to_vec())
        );

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(memory_cache(), Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
