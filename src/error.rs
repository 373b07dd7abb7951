//! Error types for the memory cache
//!
//! Provides unified error handling using thiserror.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Shared, cloneable source error produced by a `get_or_create` factory.
pub type FactoryError = Arc<dyn StdError + Send + Sync + 'static>;

// == Cache Error Enum ==
/// Unified error type for the memory cache.
///
/// Misses are not errors: lookups return `Option`. Callback failures are
/// logged by the dispatcher and never surface here.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Entry options contradict themselves (e.g. a non-positive duration)
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Store configuration was rejected
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The value factory of `get_or_create` failed
    #[error("Factory failed for key '{key}': {source}")]
    Factory {
        key: String,
        #[source]
        source: FactoryError,
    },

    /// The in-flight creation was dropped or panicked before completing
    #[error("Creation of key '{key}' was abandoned")]
    Abandoned { key: String },
}

impl CacheError {
    /// Wraps a factory error for `key`.
    pub(crate) fn factory<E>(key: &str, err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        CacheError::Factory {
            key: key.to_string(),
            source: Arc::from(err.into()),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the memory cache.
pub type Result<T> = std::result::Result<T, CacheError>;
