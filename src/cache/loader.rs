//! Single-Flight Loader Module
//!
//! A slot that one leader fills while any number of sync threads and async
//! tasks wait on it.

use std::pin::pin;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::{CacheError, Result};

enum LoadState<V> {
    Loading,
    Ready(Arc<V>),
    Failed(CacheError),
}

// == Load Slot ==
/// The in-flight creation of one key.
pub(crate) struct LoadSlot<V> {
    state: Mutex<LoadState<V>>,
    ready: Condvar,
    notify: Notify,
}

impl<V> LoadSlot<V> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LoadState::Loading),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    // == Complete ==
    /// Publishes the outcome and wakes every waiter. Later calls are ignored.
    pub(crate) fn complete(&self, outcome: Result<Arc<V>>) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, LoadState::Loading) {
                return;
            }
            *state = match outcome {
                Ok(value) => LoadState::Ready(value),
                Err(err) => LoadState::Failed(err),
            };
        }
        self.ready.notify_all();
        self.notify.notify_waiters();
    }

    fn resolve(state: &LoadState<V>) -> Option<Result<Arc<V>>> {
        match state {
            LoadState::Loading => None,
            LoadState::Ready(value) => Some(Ok(value.clone())),
            LoadState::Failed(err) => Some(Err(err.clone())),
        }
    }

    // == Wait ==
    /// Blocks the calling thread until the leader completes.
    pub(crate) fn wait(&self) -> Result<Arc<V>> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::resolve(&state) {
                return outcome;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Suspends the calling task until the leader completes.
    pub(crate) async fn wait_async(&self) -> Result<Arc<V>> {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Register before checking so a completion in between is not lost.
            notified.as_mut().enable();
            let outcome = Self::resolve(&self.state.lock());
            if let Some(outcome) = outcome {
                return outcome;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_waiters_see_value() {
        let slot = Arc::new(LoadSlot::<u32>::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                thread::spawn(move || slot.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        slot.complete(Ok(Arc::new(9)));

        for waiter in waiters {
            assert_eq!(*waiter.join().unwrap().unwrap(), 9);
        }
    }

    #[test]
    fn test_first_completion_wins() {
        let slot = LoadSlot::<u32>::new();
        slot.complete(Ok(Arc::new(1)));
        slot.complete(Err(CacheError::Abandoned { key: "k".into() }));

        assert_eq!(*slot.wait().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_waiters_see_failure() {
        let slot = Arc::new(LoadSlot::<u32>::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait_async().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        slot.complete(Err(CacheError::Abandoned { key: "k".into() }));

        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(CacheError::Abandoned { .. })));
    }

    #[test]
    fn test_completed_slot_resolves_immediately() {
        let slot = LoadSlot::<u32>::new();
        slot.complete(Ok(Arc::new(3)));

        let value = tokio_test::block_on(slot.wait_async()).unwrap();
        assert_eq!(*value, 3);
    }
}
