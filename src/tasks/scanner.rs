//! Expiration Scanner Task
//!
//! Background task that periodically evicts expired cache entries, so stale
//! entries nobody reads again do not pin memory until the next access.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::MemoryCache;

/// Spawns a background task that periodically sweeps the cache for expired
/// entries.
///
/// Each sweep evicts entries whose deadline passed or whose token was
/// cancelled, firing their post-eviction callbacks with `Expired` or
/// `TokenExpired`. Sweeps run on the blocking pool because callbacks are
/// synchronous user code.
///
/// # Arguments
/// * `cache` - Handle to the cache to sweep
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = MemoryCache::<String>::new(&Config::default())?;
/// let scanner = spawn_expiration_scanner(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// scanner.abort();
/// ```
pub fn spawn_expiration_scanner<V>(cache: MemoryCache<V>, interval: Duration) -> JoinHandle<()>
where
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(
            "Starting expiration scanner with interval of {} ms",
            interval.as_millis()
        );

        loop {
            tokio::time::sleep(interval).await;

            let sweep = cache.clone();
            let removed = match tokio::task::spawn_blocking(move || sweep.scan_expired()).await {
                Ok(removed) => removed,
                Err(err) => {
                    debug!(error = %err, "expiration sweep did not complete");
                    continue;
                }
            };

            if removed > 0 {
                info!("Expiration scan: removed {} expired entries", removed);
            } else {
                debug!("Expiration scan: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntryOptions, EvictionReason, ManualClock};
    use crate::config::Config;
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn cache_with_clock() -> (MemoryCache<String>, ManualClock) {
        let clock = ManualClock::default();
        let cache = MemoryCache::with_clock(&Config::default(), Arc::new(clock.clone())).unwrap();
        (cache, clock)
    }

    #[tokio::test]
    async fn test_scanner_removes_expired_entries() {
        let (cache, clock) = cache_with_clock();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = reasons.clone();

        cache
            .set(
                "expire_soon",
                "value".to_string(),
                EntryOptions::new()
                    .absolute_expiration_relative_to_now(ChronoDuration::seconds(1))
                    .post_eviction_callback(move |_, notice| {
                        sink.lock().push(notice.reason);
                        Ok(())
                    }),
            )
            .unwrap();

        let handle = spawn_expiration_scanner(cache.clone(), Duration::from_millis(20));

        clock.advance(ChronoDuration::seconds(2));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Removed by the sweep, not by a read
        assert!(cache.is_empty(), "Expired entry should have been swept");
        assert_eq!(*reasons.lock(), vec![EvictionReason::Expired]);

        handle.abort();
    }

    #[tokio::test]
    async fn test_scanner_preserves_valid_entries() {
        let (cache, _clock) = cache_with_clock();

        cache
            .set(
                "long_lived",
                "value".to_string(),
                EntryOptions::new().absolute_expiration_relative_to_now(ChronoDuration::hours(1)),
            )
            .unwrap();

        let handle = spawn_expiration_scanner(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("long_lived").as_deref(), Some(&"value".to_string()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_scanner_can_be_aborted() {
        let (cache, _clock) = cache_with_clock();

        let handle = spawn_expiration_scanner(cache, Duration::from_secs(1));

        // Abort immediately
        handle.abort();

        // Wait a bit and verify task is finished
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
