//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - Expiration scan: proactively evicts entries that expired without being read

mod scanner;

pub use scanner::spawn_expiration_scanner;
