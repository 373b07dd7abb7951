//! Callback Dispatch Module
//!
//! Runs post-eviction callbacks for an entry that has already left the store.

use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::cache::entry::CacheEntry;
use crate::cache::options::EvictionNotice;
use crate::cache::{EvictionReason, MemoryCache};

// == Dispatch ==
/// Marks `entry` evicted and invokes its callbacks in registration order.
///
/// Must be called with no store lock held: callbacks may re-enter `cache`.
/// A callback that returns an error or panics is logged and counted; the
/// remaining callbacks still run and nothing propagates to the caller.
///
/// Returns the number of callbacks that failed.
pub(crate) fn dispatch<V>(cache: &MemoryCache<V>, entry: &CacheEntry<V>, reason: EvictionReason) -> usize {
    let callbacks = entry.mark_evicted();
    let mut failures = 0;

    for registration in &callbacks {
        let notice = EvictionNotice {
            key: &entry.key,
            value: &entry.value,
            reason,
            state: registration.state.as_ref(),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (registration.callback)(cache, &notice)
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failures += 1;
                error!(key = %entry.key, %reason, error = %err, "post-eviction callback failed");
            }
            Err(payload) => {
                failures += 1;
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(key = %entry.key, %reason, panic = %message, "post-eviction callback panicked");
            }
        }
    }

    if failures > 0 {
        cache.shared.stats.record_callback_failures(failures as u64);
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntryOptions;
    use crate::config::Config;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    fn cache() -> MemoryCache<String> {
        MemoryCache::new(&Config::default()).unwrap()
    }

    fn entry(options: EntryOptions<String>) -> CacheEntry<String> {
        CacheEntry::new(
            1,
            "key".to_string(),
            Arc::new("value".to_string()),
            options,
            Utc::now(),
            Weak::new(),
        )
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (order.clone(), order.clone());
        let entry = entry(
            EntryOptions::new()
                .post_eviction_callback(move |_, _| {
                    first.lock().push(1);
                    Ok(())
                })
                .post_eviction_callback(move |_, _| {
                    second.lock().push(2);
                    Ok(())
                }),
        );

        assert_eq!(dispatch(&cache(), &entry, EvictionReason::Removed), 0);
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_notice_carries_key_value_reason_and_state() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let entry = entry(EntryOptions::new().post_eviction_callback_with_state(
            move |_: &MemoryCache<String>, notice| {
                *sink.lock() = Some((
                    notice.key.to_string(),
                    notice.value.to_string(),
                    notice.reason,
                    notice.state_as::<u32>().copied(),
                ));
                Ok(())
            },
            Arc::new(42u32),
        ));

        dispatch(&cache(), &entry, EvictionReason::Expired);

        assert_eq!(
            *seen.lock(),
            Some((
                "key".to_string(),
                "value".to_string(),
                EvictionReason::Expired,
                Some(42)
            ))
        );
    }

    #[test]
    fn test_failing_callback_does_not_block_the_rest() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let cache = cache();
        let entry = entry(
            EntryOptions::new()
                .post_eviction_callback(|_, _| Err(anyhow::anyhow!("listener offline")))
                .post_eviction_callback(|_, _| panic!("listener exploded"))
                .post_eviction_callback(move |_, _| {
                    *flag.lock() = true;
                    Ok(())
                }),
        );

        assert_eq!(dispatch(&cache, &entry, EvictionReason::Removed), 2);
        assert!(*ran.lock());
        assert_eq!(cache.stats().callback_failures, 2);
    }
}
