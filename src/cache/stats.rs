//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, evictions and
//! callback failures.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// Number of entries that left the store for any reason
    pub evictions: u64,
    /// Number of post-eviction callbacks that errored or panicked
    pub callback_failures: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Stats Counters ==
/// Lock-free counters shared by every shard.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    callback_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_failures(&self, count: u64) {
        self.callback_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, total_entries: usize, captured_at: DateTime<Utc>) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            total_entries,
            captured_at,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(counters: &StatsCounters) -> CacheStats {
        counters.snapshot(0, Utc::now())
    }

    #[test]
    fn test_stats_new() {
        let stats = snapshot(&StatsCounters::default());
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.callback_failures, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = snapshot(&StatsCounters::default());
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_all_hits() {
        let counters = StatsCounters::default();
        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        assert_eq!(snapshot(&counters).hit_rate(), 1.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counters = StatsCounters::default();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(snapshot(&counters).hit_rate(), 0.5);
    }

    #[test]
    fn test_record_eviction_and_failures() {
        let counters = StatsCounters::default();
        counters.record_eviction();
        counters.record_eviction();
        counters.record_callback_failures(3);

        let stats = snapshot(&counters);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.callback_failures, 3);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let counters = StatsCounters::default();
        counters.record_hit();

        let json = serde_json::to_value(counters.snapshot(7, Utc::now())).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["total_entries"], 7);
        assert!(json["captured_at"].is_string());
    }
}
