//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// A missing key is never an error; lookups report it as `None`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Construction-time configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The loader failed; its error is passed through untouched
    #[error(transparent)]
    Loader(anyhow::Error),
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
