//! Memory Cache - an in-process cache engine
//!
//! Keyed storage with absolute and sliding expiration, expiration tokens for
//! dependency-based invalidation, priority-aware compaction and post-eviction
//! callbacks that may re-enter the cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{
    CachePriority, EntryBuilder, EntryOptions, EvictionNotice, EvictionReason, ExpirationToken,
    MemoryCache,
};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_expiration_scanner;
