//! Cache Entry Module
//!
//! Defines a single cache record, its expiration predicate and the reasons an
//! entry can leave the store.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::cache::options::{CachePriority, EntryOptions, PostEvictionCallback};
use crate::cache::store::CacheShared;
use crate::cache::token::TokenObserver;
use crate::cache::{ExpirationToken, MemoryCache};

// == Eviction Reason ==
/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvictionReason {
    /// Absolute or sliding deadline passed
    Expired,
    /// A subscribed expiration token was cancelled
    TokenExpired,
    /// Overwritten by a newer entry for the same key
    Replaced,
    /// Explicitly removed
    Removed,
    /// Chosen by capacity compaction
    Capacity,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionReason::Expired => "Expired",
            EvictionReason::TokenExpired => "TokenExpired",
            EvictionReason::Replaced => "Replaced",
            EvictionReason::Removed => "Removed",
            EvictionReason::Capacity => "Capacity",
        };
        f.write_str(name)
    }
}

// == Cache Entry ==
/// A published cache record.
///
/// Entries are shared as `Arc<CacheEntry<V>>`; the map holds one reference
/// and readers clone it out of the shard before releasing the lock.
pub(crate) struct CacheEntry<V> {
    /// Unique per store; distinguishes a replaced entry from its successor.
    pub(crate) id: u64,
    pub(crate) key: String,
    pub(crate) value: Arc<V>,
    pub(crate) absolute_expiration: Option<DateTime<Utc>>,
    pub(crate) sliding_expiration: Option<Duration>,
    pub(crate) priority: CachePriority,
    pub(crate) tokens: Vec<ExpirationToken>,
    last_access: Mutex<DateTime<Utc>>,
    /// Taken exactly once, by the eviction that wins.
    callbacks: Mutex<Vec<PostEvictionCallback<V>>>,
    evicted: AtomicBool,
    owner: Weak<CacheShared<V>>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Builds an entry from validated options, resolving deadlines at `now`.
    pub(crate) fn new(
        id: u64,
        key: String,
        value: Arc<V>,
        options: EntryOptions<V>,
        now: DateTime<Utc>,
        owner: Weak<CacheShared<V>>,
    ) -> Self {
        let absolute_expiration = options.resolve_deadline(now);
        Self {
            id,
            key,
            value,
            absolute_expiration,
            sliding_expiration: options.sliding_expiration,
            priority: options.priority,
            tokens: options.expiration_tokens,
            last_access: Mutex::new(now),
            callbacks: Mutex::new(options.post_eviction_callbacks),
            evicted: AtomicBool::new(false),
            owner,
        }
    }

    // == Expiration Check ==
    /// Returns why the entry is no longer valid at `now`, if it isn't.
    ///
    /// Pure: reads time and token state only. Token cancellation is reported
    /// ahead of time-based expiry.
    pub(crate) fn expiration_reason(&self, now: DateTime<Utc>) -> Option<EvictionReason> {
        if self.tokens.iter().any(ExpirationToken::is_cancelled) {
            return Some(EvictionReason::TokenExpired);
        }
        if let Some(deadline) = self.absolute_expiration {
            if now >= deadline {
                return Some(EvictionReason::Expired);
            }
        }
        if let Some(window) = self.sliding_expiration {
            if now >= *self.last_access.lock() + window {
                return Some(EvictionReason::Expired);
            }
        }
        None
    }

    /// Records a successful read, pushing the sliding deadline forward.
    pub(crate) fn touch(&self, now: DateTime<Utc>) {
        let mut last_access = self.last_access.lock();
        if now > *last_access {
            *last_access = now;
        }
    }

    pub(crate) fn last_access(&self) -> DateTime<Utc> {
        *self.last_access.lock()
    }

    // == Mark Evicted ==
    /// Transitions the entry from live to evicted and hands back its callbacks.
    ///
    /// # Panics
    /// Panics if the entry was already evicted; the store guarantees a single
    /// winner per entry, so a second call is a bug.
    pub(crate) fn mark_evicted(&self) -> Vec<PostEvictionCallback<V>> {
        let already = self.evicted.swap(true, Ordering::AcqRel);
        assert!(!already, "cache entry '{}' evicted twice", self.key);
        std::mem::take(&mut *self.callbacks.lock())
    }

    #[cfg(test)]
    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }
}

impl<V: Send + Sync + 'static> CacheEntry<V> {
    /// Subscribes this entry to each of its tokens.
    ///
    /// Called after the entry is visible in the store, so a token that is
    /// already cancelled evicts it straight away.
    pub(crate) fn subscribe(self: &Arc<Self>) {
        if self.tokens.is_empty() {
            return;
        }
        let observer: Arc<dyn TokenObserver> = self.clone();
        for token in &self.tokens {
            token.register(Arc::downgrade(&observer));
        }
    }
}

impl<V: Send + Sync + 'static> TokenObserver for CacheEntry<V> {
    fn on_token_cancelled(&self) {
        if let Some(shared) = self.owner.upgrade() {
            MemoryCache::from_shared(shared).evict_if_current(
                &self.key,
                self.id,
                EvictionReason::TokenExpired,
            );
        }
    }
}

impl<V> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("absolute_expiration", &self.absolute_expiration)
            .field("sliding_expiration", &self.sliding_expiration)
            .field("priority", &self.priority)
            .field("evicted", &self.evicted.load(Ordering::Relaxed))
            .finish()
    }
}
