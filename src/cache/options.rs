//! Entry Options Module
//!
//! Expiration policy, priority, token subscriptions and post-eviction
//! callbacks attached to an entry when it is published.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::cache::{EvictionReason, ExpirationToken, MemoryCache};
use crate::error::{CacheError, Result};

// == Cache Priority ==
/// Hint for capacity compaction ordering. Lower priorities go first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
    /// Exempt from capacity compaction. Still subject to time, tokens,
    /// replacement and explicit removal.
    NeverRemove,
}

/// Opaque state handed back to a post-eviction callback.
pub type CallbackState = Arc<dyn Any + Send + Sync>;

/// Signature of a post-eviction callback.
///
/// The callback receives the cache it was evicted from, so it can re-enter
/// the store without capturing it.
pub type EvictionCallbackFn<V> =
    dyn Fn(&MemoryCache<V>, &EvictionNotice<'_, V>) -> anyhow::Result<()> + Send + Sync;

// == Eviction Notice ==
/// What a post-eviction callback is told about the entry that left the store.
pub struct EvictionNotice<'a, V> {
    pub key: &'a str,
    pub value: &'a Arc<V>,
    pub reason: EvictionReason,
    pub state: Option<&'a CallbackState>,
}

impl<V> EvictionNotice<'_, V> {
    /// Downcasts the registration state to `T`.
    pub fn state_as<T: Any>(&self) -> Option<&T> {
        self.state.and_then(|s| s.downcast_ref::<T>())
    }
}

// == Post Eviction Callback ==
/// A callback plus the state it was registered with.
pub struct PostEvictionCallback<V> {
    pub(crate) callback: Arc<EvictionCallbackFn<V>>,
    pub(crate) state: Option<CallbackState>,
}

impl<V> PostEvictionCallback<V> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&MemoryCache<V>, &EvictionNotice<'_, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            state: None,
        }
    }

    pub fn with_state<F>(callback: F, state: CallbackState) -> Self
    where
        F: Fn(&MemoryCache<V>, &EvictionNotice<'_, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            state: Some(state),
        }
    }
}

impl<V> Clone for PostEvictionCallback<V> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            state: self.state.clone(),
        }
    }
}

impl<V> fmt::Debug for PostEvictionCallback<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostEvictionCallback")
            .field("has_state", &self.state.is_some())
            .finish()
    }
}

// == Entry Options ==
/// Configuration applied to an entry when it is published.
#[derive(Debug)]
pub struct EntryOptions<V> {
    pub absolute_expiration: Option<DateTime<Utc>>,
    pub absolute_expiration_relative_to_now: Option<Duration>,
    pub sliding_expiration: Option<Duration>,
    pub priority: CachePriority,
    pub expiration_tokens: Vec<ExpirationToken>,
    pub post_eviction_callbacks: Vec<PostEvictionCallback<V>>,
}

impl<V> Default for EntryOptions<V> {
    fn default() -> Self {
        Self {
            absolute_expiration: None,
            absolute_expiration_relative_to_now: None,
            sliding_expiration: None,
            priority: CachePriority::Normal,
            expiration_tokens: Vec::new(),
            post_eviction_callbacks: Vec::new(),
        }
    }
}

impl<V> Clone for EntryOptions<V> {
    fn clone(&self) -> Self {
        Self {
            absolute_expiration: self.absolute_expiration,
            absolute_expiration_relative_to_now: self.absolute_expiration_relative_to_now,
            sliding_expiration: self.sliding_expiration,
            priority: self.priority,
            expiration_tokens: self.expiration_tokens.clone(),
            post_eviction_callbacks: self.post_eviction_callbacks.clone(),
        }
    }
}

impl<V> EntryOptions<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absolute_expiration(mut self, at: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    pub fn absolute_expiration_relative_to_now(mut self, ttl: Duration) -> Self {
        self.absolute_expiration_relative_to_now = Some(ttl);
        self
    }

    pub fn sliding_expiration(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    pub fn priority(mut self, priority: CachePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn expiration_token(mut self, token: ExpirationToken) -> Self {
        self.expiration_tokens.push(token);
        self
    }

    /// Appends a callback. Callbacks fire in registration order.
    pub fn post_eviction_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MemoryCache<V>, &EvictionNotice<'_, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.post_eviction_callbacks
            .push(PostEvictionCallback::new(callback));
        self
    }

    pub fn post_eviction_callback_with_state<F>(mut self, callback: F, state: CallbackState) -> Self
    where
        F: Fn(&MemoryCache<V>, &EvictionNotice<'_, V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.post_eviction_callbacks
            .push(PostEvictionCallback::with_state(callback, state));
        self
    }

    // == Validate ==
    /// Rejects non-positive durations before anything touches the store.
    pub fn validate(&self) -> Result<()> {
        if let Some(window) = self.sliding_expiration {
            if window <= Duration::zero() {
                return Err(CacheError::InvalidOptions(format!(
                    "sliding expiration must be positive, got {}",
                    window
                )));
            }
        }
        if let Some(ttl) = self.absolute_expiration_relative_to_now {
            if ttl <= Duration::zero() {
                return Err(CacheError::InvalidOptions(format!(
                    "relative absolute expiration must be positive, got {}",
                    ttl
                )));
            }
        }
        Ok(())
    }

    /// Resolves the effective absolute deadline as seen at `now`.
    ///
    /// The earlier of the fixed and the relative deadline wins.
    pub(crate) fn resolve_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let relative = self.absolute_expiration_relative_to_now.map(|ttl| now + ttl);
        match (self.absolute_expiration, relative) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
