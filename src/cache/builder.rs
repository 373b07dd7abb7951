//! Entry Builder Module
//!
//! Scoped construction of a single entry: configure everything, then publish
//! it in one step.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::cache::options::CallbackState;
use crate::cache::{CachePriority, EntryOptions, EvictionNotice, ExpirationToken, MemoryCache};
use crate::error::{CacheError, Result};

// == Entry Builder ==
/// A pending entry bound to one key.
///
/// Nothing is visible in the cache until [`EntryBuilder::commit`] runs. A
/// builder dropped with a value set commits itself (a failed commit is
/// logged); one dropped without a value, or [`discard`](EntryBuilder::discard)ed,
/// leaves the cache untouched.
pub struct EntryBuilder<V: Send + Sync + 'static> {
    cache: MemoryCache<V>,
    key: String,
    value: Option<V>,
    options: EntryOptions<V>,
    done: bool,
}

impl<V: Send + Sync + 'static> EntryBuilder<V> {
    pub(crate) fn new(cache: MemoryCache<V>, key: String) -> Self {
        Self {
            cache,
            key,
            value: None,
            options: EntryOptions::default(),
            done: false,
        }
    }

    // == Key ==
    /// The key this builder publishes under.
    pub fn key(&self) -> &str {
        &self.key
    }

    // == Set Value ==
    /// Sets the value to publish. Required before commit.
    pub fn set_value(&mut self, value: V) -> &mut Self {
        self.value = Some(value);
        self
    }

    // == Set Absolute Expiration ==
    /// Expires the entry at a fixed point in time.
    pub fn set_absolute_expiration(&mut self, at: DateTime<Utc>) -> &mut Self {
        self.options.absolute_expiration = Some(at);
        self
    }

    // == Set Absolute Expiration Relative To Now ==
    /// Expires the entry `ttl` after it is committed.
    pub fn set_absolute_expiration_relative_to_now(&mut self, ttl: Duration) -> &mut Self {
        self.options.absolute_expiration_relative_to_now = Some(ttl);
        self
    }

    // == Set Sliding Expiration ==
    /// Expires the entry once it goes unread for `window`.
    pub fn set_sliding_expiration(&mut self, window: Duration) -> &mut Self {
        self.options.sliding_expiration = Some(window);
        self
    }

    // == Set Priority ==
    /// Sets how readily capacity compaction picks this entry.
    pub fn set_priority(&mut self, priority: CachePriority) -> &mut Self {
        self.options.priority = priority;
        self
    }

    // == Add Expiration Token ==
    /// Evicts the entry with `TokenExpired` when `token` is cancelled.
    pub fn add_expiration_token(&mut self, token: ExpirationToken) -> &mut Self {
        self.options.expiration_tokens.push(token);
        self
    }

    // == Register Post Eviction Callback ==
    /// Appends a callback that runs once when the entry leaves the cache.
    pub fn register_post_eviction_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&MemoryCache<V>, &EvictionNotice<'_, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let options = std::mem::take(&mut self.options);
        self.options = options.post_eviction_callback(callback);
        self
    }

    /// Like [`register_post_eviction_callback`](EntryBuilder::register_post_eviction_callback),
    /// passing `state` to the callback through the eviction notice.
    pub fn register_post_eviction_callback_with_state<F>(
        &mut self,
        callback: F,
        state: CallbackState,
    ) -> &mut Self
    where
        F: Fn(&MemoryCache<V>, &EvictionNotice<'_, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let options = std::mem::take(&mut self.options);
        self.options = options.post_eviction_callback_with_state(callback, state);
        self
    }

    // == Commit ==
    /// Validates the options and publishes the entry.
    ///
    /// Fails with `InvalidOptions` when no value was set or the options are
    /// contradictory; in both cases the cache is left untouched.
    pub fn commit(mut self) -> Result<Arc<V>> {
        self.done = true;
        self.publish()
    }

    // == Discard ==
    /// Drops the builder without publishing anything.
    pub fn discard(mut self) {
        self.done = true;
    }

    fn publish(&mut self) -> Result<Arc<V>> {
        let value = self.value.take().ok_or_else(|| {
            CacheError::InvalidOptions(format!("entry '{}' committed without a value", self.key))
        })?;
        let options = std::mem::take(&mut self.options);
        self.cache
            .publish(std::mem::take(&mut self.key), Arc::new(value), options)
    }
}

impl<V: Send + Sync + 'static> Drop for EntryBuilder<V> {
    fn drop(&mut self) {
        if self.done || self.value.is_none() {
            return;
        }
        let key = self.key.clone();
        if let Err(err) = self.publish() {
            warn!(key = %key, error = %err, "dropped entry builder failed to publish");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionReason;
    use crate::config::Config;
    use parking_lot::Mutex;

    fn cache() -> MemoryCache<String> {
        MemoryCache::new(&Config::default()).unwrap()
    }

    #[test]
    fn test_entry_invisible_until_commit() {
        let cache = cache();
        let mut builder = cache.create_entry("key");
        builder.set_value("value".to_string());

        assert!(cache.get("key").is_none());

        builder.commit().unwrap();
        assert_eq!(cache.get("key").as_deref(), Some(&"value".to_string()));
    }

    #[test]
    fn test_drop_with_value_commits() {
        let cache = cache();
        {
            let mut builder = cache.create_entry("key");
            builder
                .set_value("value".to_string())
                .set_priority(CachePriority::High);
        }
        assert!(cache.get("key").is_some());
    }

    #[test]
    fn test_drop_without_value_publishes_nothing() {
        let cache = cache();
        {
            let mut builder = cache.create_entry("key");
            builder.set_sliding_expiration(Duration::seconds(5));
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_discard_publishes_nothing() {
        let cache = cache();
        let mut builder = cache.create_entry("key");
        builder.set_value("value".to_string());
        builder.discard();

        assert!(cache.is_empty());
    }

    #[test]
    fn test_commit_without_value_is_invalid() {
        let cache = cache();
        let result = cache.create_entry("key").commit();

        assert!(matches!(result, Err(CacheError::InvalidOptions(_))));
    }

    #[test]
    fn test_commit_rejects_negative_sliding() {
        let cache = cache();
        let mut builder = cache.create_entry("key");
        builder
            .set_value("value".to_string())
            .set_sliding_expiration(Duration::seconds(-1));

        assert!(matches!(builder.commit(), Err(CacheError::InvalidOptions(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_builder_registers_token_and_callback() {
        let cache = cache();
        let token = ExpirationToken::new();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = reasons.clone();

        let mut builder = cache.create_entry("key");
        builder
            .set_value("value".to_string())
            .add_expiration_token(token.clone())
            .register_post_eviction_callback(move |_, notice| {
                sink.lock().push(notice.reason);
                Ok(())
            });
        builder.commit().unwrap();

        token.cancel();

        assert!(cache.get("key").is_none());
        assert_eq!(*reasons.lock(), vec![EvictionReason::TokenExpired]);
    }
}
