//! Cache Store Module
//!
//! Main cache engine: a sharded key to entry map with lazy expiration,
//! single-flight creation, capacity compaction and eviction dispatch.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::cache::builder::EntryBuilder;
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::dispatch::dispatch;
use crate::cache::entry::CacheEntry;
use crate::cache::loader::LoadSlot;
use crate::cache::stats::StatsCounters;
use crate::cache::{CachePriority, CacheStats, EntryOptions, EvictionReason};
use crate::config::Config;
use crate::error::{CacheError, Result};

type EntryMap<V> = HashMap<String, Arc<CacheEntry<V>>>;

// == Shard ==
/// One independently locked partition of the key space.
pub(crate) struct Shard<V> {
    entries: RwLock<EntryMap<V>>,
    /// In-flight `get_or_create` slots for keys in this shard.
    pending: Mutex<HashMap<String, Arc<LoadSlot<V>>>>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }
}

/// State shared by every handle to one cache.
pub(crate) struct CacheShared<V> {
    shards: Box<[Shard<V>]>,
    hasher: ahash::RandomState,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    len: AtomicUsize,
    max_entries: Option<usize>,
    compaction_percentage: f64,
    /// Held for the duration of one compaction sweep.
    compacting: Mutex<()>,
    pub(crate) stats: StatsCounters,
}

// == Memory Cache ==
/// A thread-safe in-process cache.
///
/// `MemoryCache` is a cheap handle; clones share the same store. Construct
/// one at startup and hand clones to whatever needs it.
///
/// Operations on different keys only contend when the keys share a shard.
/// Post-eviction callbacks always run after the shard lock is released and
/// receive a handle to this cache, so they may call back into it.
pub struct MemoryCache<V> {
    pub(crate) shared: Arc<CacheShared<V>>,
}

impl<V> Clone for MemoryCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("shards", &self.shared.shards.len())
            .field("len", &self.len())
            .field("max_entries", &self.shared.max_entries)
            .finish()
    }
}

/// Outcome of joining the single-flight table for a key.
enum Flight<V: Send + Sync + 'static> {
    Hit(Arc<V>),
    Follower(Arc<LoadSlot<V>>),
    Leader(LeaderGuard<V>),
}

impl<V> MemoryCache<V> {
    pub(crate) fn from_shared(shared: Arc<CacheShared<V>>) -> Self {
        Self { shared }
    }

    fn shard(&self, key: &str) -> &Shard<V> {
        let hash = BuildHasher::hash_one(&self.shared.hasher, key);
        let index = hash as usize % self.shared.shards.len();
        &self.shared.shards[index]
    }

    /// Current time according to the cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.shared.len.load(Ordering::Acquire)
    }

    // == Is Empty ==
    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.shared.stats.snapshot(self.len(), self.now())
    }
}

impl<V: Send + Sync + 'static> MemoryCache<V> {
    // == Constructor ==
    /// Creates a cache driven by the system clock.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a cache driven by `clock`.
    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let shards = (0..config.shard_count).map(|_| Shard::new()).collect();
        Ok(Self {
            shared: Arc::new(CacheShared {
                shards,
                hasher: ahash::RandomState::new(),
                clock,
                next_id: AtomicU64::new(1),
                len: AtomicUsize::new(0),
                max_entries: config.max_entries,
                compaction_percentage: config.compaction_percentage,
                compacting: Mutex::new(()),
                stats: StatsCounters::default(),
            }),
        })
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// A hit refreshes sliding expiration. An entry found expired is evicted
    /// on the spot (firing its callbacks) and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let now = self.now();
        let lookup = {
            let entries = self.shard(key).entries.read();
            entries
                .get(key)
                .map(|entry| match entry.expiration_reason(now) {
                    None => {
                        entry.touch(now);
                        Ok(entry.value.clone())
                    }
                    Some(reason) => Err((entry.id, reason)),
                })
        };

        match lookup {
            Some(Ok(value)) => {
                self.shared.stats.record_hit();
                Some(value)
            }
            Some(Err((id, reason))) => {
                self.evict_if_current(key, id, reason);
                self.shared.stats.record_miss();
                None
            }
            None => {
                self.shared.stats.record_miss();
                None
            }
        }
    }

    /// Live lookup that neither evicts nor counts towards statistics.
    fn peek(&self, key: &str) -> Option<Arc<V>> {
        let now = self.now();
        let entries = self.shard(key).entries.read();
        let entry = entries.get(key)?;
        if entry.expiration_reason(now).is_some() {
            return None;
        }
        entry.touch(now);
        Some(entry.value.clone())
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// The previous entry is evicted with `Replaced` and its callbacks run
    /// before the new value becomes visible; a `get` made from one of those
    /// callbacks misses. Options are validated before the store is touched.
    pub fn set(&self, key: impl Into<String>, value: V, options: EntryOptions<V>) -> Result<Arc<V>> {
        self.publish(key.into(), Arc::new(value), options)
    }

    pub(crate) fn publish(
        &self,
        key: String,
        value: Arc<V>,
        options: EntryOptions<V>,
    ) -> Result<Arc<V>> {
        options.validate()?;

        let now = self.now();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(CacheEntry::new(
            id,
            key.clone(),
            value.clone(),
            options,
            now,
            Arc::downgrade(&self.shared),
        ));
        let arrival = entry.expiration_reason(now);

        // Every displaced entry finishes its callbacks before the new one is
        // installed, including entries a callback put back in the meantime.
        loop {
            let displaced = {
                let mut entries = self.shard(&key).entries.write();
                match entries.remove(&key) {
                    Some(old) => old,
                    None => {
                        if arrival.is_none() {
                            entries.insert(key.clone(), entry.clone());
                            self.shared.len.fetch_add(1, Ordering::AcqRel);
                        }
                        break;
                    }
                }
            };

            self.shared.len.fetch_sub(1, Ordering::AcqRel);
            self.finish_eviction(&displaced, EvictionReason::Replaced);
            if arrival.is_some() {
                break;
            }
        }

        match arrival {
            None => {
                debug!(key = %key, "entry published");
                entry.subscribe();
                self.enforce_capacity();
            }
            Some(reason) => {
                debug!(key = %key, %reason, "entry expired on arrival");
                self.finish_eviction(&entry, reason);
            }
        }

        Ok(value)
    }

    // == Get Or Create ==
    /// Returns the live value for `key`, or creates it with `factory`.
    ///
    /// Creation is single-flight per key: concurrent callers for the same
    /// missing key block until the first caller's factory finishes and all
    /// receive its value, or its error. The factory runs with no lock held.
    pub fn get_or_create<F, E>(&self, key: &str, factory: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> std::result::Result<(V, EntryOptions<V>), E>,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let leader = match self.join_or_lead(key) {
            Flight::Hit(value) => return Ok(value),
            Flight::Follower(slot) => return slot.wait(),
            Flight::Leader(leader) => leader,
        };

        let created = factory();
        self.settle(leader, key, created)
    }

    /// Async variant of [`MemoryCache::get_or_create`].
    ///
    /// Followers suspend instead of blocking. If the leading future is
    /// dropped before its factory completes, followers get `Abandoned`.
    pub async fn get_or_create_async<F, Fut, E>(&self, key: &str, factory: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(V, EntryOptions<V>), E>>,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let leader = match self.join_or_lead(key) {
            Flight::Hit(value) => return Ok(value),
            Flight::Follower(slot) => return slot.wait_async().await,
            Flight::Leader(leader) => leader,
        };

        let created = factory().await;
        self.settle(leader, key, created)
    }

    /// Hands the factory's outcome to waiting followers, then publishes it.
    ///
    /// The slot leaves the pending table before `publish` can dispatch any
    /// callback, so a callback asking for the same key starts a fresh
    /// creation instead of waiting on this one.
    fn settle<E>(
        &self,
        leader: LeaderGuard<V>,
        key: &str,
        created: std::result::Result<(V, EntryOptions<V>), E>,
    ) -> Result<Arc<V>>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let (value, options) = match created {
            Ok(created) => created,
            Err(err) => return leader.finish(Err(CacheError::factory(key, err))),
        };
        if let Err(err) = options.validate() {
            return leader.finish(Err(err));
        }

        let value = leader.finish(Ok(Arc::new(value)))?;
        self.publish(key.to_string(), value, options)
    }

    fn join_or_lead(&self, key: &str) -> Flight<V> {
        let mut pending = self.shard(key).pending.lock();

        // A leader may have published between our miss and taking the lock.
        if let Some(value) = self.peek(key) {
            return Flight::Hit(value);
        }
        if let Some(slot) = pending.get(key) {
            return Flight::Follower(slot.clone());
        }

        let slot = Arc::new(LoadSlot::new());
        pending.insert(key.to_string(), slot.clone());
        Flight::Leader(LeaderGuard {
            cache: self.clone(),
            key: key.to_string(),
            slot,
            finished: false,
        })
    }

    // == Remove ==
    /// Evicts the entry for `key` with reason `Removed`.
    ///
    /// Returns false, and fires nothing, when the key is absent.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.shard(key).entries.write().remove(key);
        match removed {
            Some(entry) => {
                self.shared.len.fetch_sub(1, Ordering::AcqRel);
                self.finish_eviction(&entry, EvictionReason::Removed);
                true
            }
            None => false,
        }
    }

    // == Create Entry ==
    /// Returns a builder that publishes an entry for `key` on commit.
    ///
    /// Nothing is visible in the store until the builder commits.
    pub fn create_entry(&self, key: impl Into<String>) -> EntryBuilder<V> {
        EntryBuilder::new(self.clone(), key.into())
    }

    // == Scan Expired ==
    /// Evicts every entry that is expired right now.
    ///
    /// Returns the number of entries removed.
    pub fn scan_expired(&self) -> usize {
        let now = self.now();
        let mut removed = 0;

        for shard in self.shared.shards.iter() {
            let expired: Vec<(String, u64, EvictionReason)> = shard
                .entries
                .read()
                .values()
                .filter_map(|entry| {
                    entry
                        .expiration_reason(now)
                        .map(|reason| (entry.key.clone(), entry.id, reason))
                })
                .collect();

            for (key, id, reason) in expired {
                if self.evict_if_current(&key, id, reason) {
                    removed += 1;
                }
            }
        }

        removed
    }

    // == Compact ==
    /// Removes roughly `percentage` of the current entries.
    ///
    /// Expired entries go first, then live ones by ascending priority and
    /// least recent access. `NeverRemove` entries are never chosen. Only one
    /// compaction runs at a time; a call made while another is in progress
    /// returns 0.
    pub fn compact(&self, percentage: f64) -> usize {
        let count = self.len();
        let to_remove = (count as f64 * percentage.clamp(0.0, 1.0)).ceil() as usize;
        self.compact_to(count.saturating_sub(to_remove))
    }

    fn enforce_capacity(&self) {
        let Some(max_entries) = self.shared.max_entries else {
            return;
        };
        if self.len() <= max_entries {
            return;
        }

        let headroom = (max_entries as f64 * self.shared.compaction_percentage).ceil() as usize;
        let target = max_entries.saturating_sub(headroom).max(1);
        let removed = self.compact_to(target);
        debug!(removed, target, "capacity compaction finished");
    }

    fn compact_to(&self, target: usize) -> usize {
        let Some(_sweep) = self.shared.compacting.try_lock() else {
            return 0;
        };

        let now = self.now();
        let mut expired = Vec::new();
        let mut candidates = Vec::new();

        for shard in self.shared.shards.iter() {
            for entry in shard.entries.read().values() {
                match entry.expiration_reason(now) {
                    Some(reason) => expired.push((entry.clone(), reason)),
                    None if entry.priority != CachePriority::NeverRemove => {
                        candidates.push(entry.clone())
                    }
                    None => {}
                }
            }
        }

        let mut removed = 0;
        for (entry, reason) in expired {
            if self.evict_if_current(&entry.key, entry.id, reason) {
                removed += 1;
            }
        }

        candidates.sort_by_cached_key(|entry| (entry.priority, entry.last_access()));
        for entry in candidates {
            if self.len() <= target {
                break;
            }
            if self.evict_if_current(&entry.key, entry.id, EvictionReason::Capacity) {
                removed += 1;
            }
        }

        removed
    }

    // == Clear ==
    /// Evicts every entry with reason `Removed`. Returns how many left.
    pub fn clear(&self) -> usize {
        let mut drained = Vec::new();
        for shard in self.shared.shards.iter() {
            let mut entries = shard.entries.write();
            drained.extend(entries.drain().map(|(_, entry)| entry));
        }

        self.shared.len.fetch_sub(drained.len(), Ordering::AcqRel);
        for entry in &drained {
            self.finish_eviction(entry, EvictionReason::Removed);
        }
        drained.len()
    }

    // == Evict If Current ==
    /// Removes the entry for `key` only if it is still the one with `id`.
    ///
    /// Returns true if this call performed the eviction.
    pub(crate) fn evict_if_current(&self, key: &str, id: u64, reason: EvictionReason) -> bool {
        let removed = {
            let mut entries = self.shard(key).entries.write();
            let is_current = entries.get(key).is_some_and(|entry| entry.id == id);
            if is_current {
                entries.remove(key)
            } else {
                None
            }
        };

        match removed {
            Some(entry) => {
                self.shared.len.fetch_sub(1, Ordering::AcqRel);
                self.finish_eviction(&entry, reason);
                true
            }
            None => false,
        }
    }

    fn finish_eviction(&self, entry: &CacheEntry<V>, reason: EvictionReason) {
        self.shared.stats.record_eviction();
        debug!(key = %entry.key, %reason, "entry evicted");
        dispatch(self, entry, reason);
    }
}

// == Leader Guard ==
/// Held by the caller running a factory. Completes the slot and clears it
/// from the pending table, even on panic or cancellation.
struct LeaderGuard<V: Send + Sync + 'static> {
    cache: MemoryCache<V>,
    key: String,
    slot: Arc<LoadSlot<V>>,
    finished: bool,
}

impl<V: Send + Sync + 'static> LeaderGuard<V> {
    fn finish(mut self, outcome: Result<Arc<V>>) -> Result<Arc<V>> {
        self.slot.complete(outcome.clone());
        self.finished = true;
        outcome
    }
}

impl<V: Send + Sync + 'static> Drop for LeaderGuard<V> {
    fn drop(&mut self) {
        if !self.finished {
            self.slot.complete(Err(CacheError::Abandoned {
                key: self.key.clone(),
            }));
        }

        let mut pending = self.cache.shard(&self.key).pending.lock();
        if pending
            .get(&self.key)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot))
        {
            pending.remove(&self.key);
        }
    }
}
