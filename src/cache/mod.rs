//! Cache Module
//!
//! Provides an in-process cache with absolute and sliding expiration,
//! expiration tokens, priority-based compaction and post-eviction callbacks.

mod builder;
mod clock;
mod dispatch;
mod entry;
mod loader;
mod options;
mod stats;
mod store;
mod token;


// Re-export public types
pub use builder::EntryBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::EvictionReason;
pub use options::{
    CachePriority, CallbackState, EntryOptions, EvictionCallbackFn, EvictionNotice,
    PostEvictionCallback,
};
pub use stats::CacheStats;
pub use store::MemoryCache;
pub use token::ExpirationToken;
