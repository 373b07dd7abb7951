//! Expiration Token Module
//!
//! A cancellable signal that invalidates every entry subscribed to it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Receives the cancellation broadcast of an `ExpirationToken`.
pub(crate) trait TokenObserver: Send + Sync {
    fn on_token_cancelled(&self);
}

struct TokenInner {
    cancelled: AtomicBool,
    /// Non-owning: a token never keeps a cache entry alive.
    observers: Mutex<Vec<Weak<dyn TokenObserver>>>,
}

// == Expiration Token ==
/// A one-way, irreversible invalidation signal.
///
/// Clones refer to the same token. Entries registered against a token are
/// evicted with `EvictionReason::TokenExpired` synchronously, on the thread
/// that calls [`ExpirationToken::cancel`].
#[derive(Clone)]
pub struct ExpirationToken {
    inner: Arc<TokenInner>,
}

impl ExpirationToken {
    /// Creates a live (not cancelled) token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns true once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    // == Cancel ==
    /// Cancels the token and notifies every live subscriber.
    ///
    /// Only the first call does any work; later calls are no-ops. Subscribers
    /// are notified after the observer list lock is released, so an eviction
    /// callback may freely cancel other tokens or re-enter the cache.
    pub fn cancel(&self) {
        let observers = {
            let mut observers = self.inner.observers.lock();
            if self.inner.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *observers)
        };

        debug!(subscribers = observers.len(), "expiration token cancelled");
        for observer in observers.iter().filter_map(Weak::upgrade) {
            observer.on_token_cancelled();
        }
    }

    // == Cancel After ==
    /// Spawns a tokio task that cancels this token after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn cancel_after(&self, delay: Duration) -> JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        })
    }

    /// Subscribes `observer` to this token.
    ///
    /// If the token is already cancelled the observer is notified immediately
    /// on the calling thread.
    pub(crate) fn register(&self, observer: Weak<dyn TokenObserver>) {
        {
            let mut observers = self.inner.observers.lock();
            if !self.inner.cancelled.load(Ordering::Acquire) {
                observers.retain(|o| o.strong_count() > 0);
                observers.push(observer);
                return;
            }
        }

        if let Some(observer) = observer.upgrade() {
            observer.on_token_cancelled();
        }
    }

    /// Number of subscribers that are still alive.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .observers
            .lock()
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }
}

impl Default for ExpirationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExpirationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
