//! Cache error types.

use std::fmt;

/// Store operation errors.
#[derive(Debug)]
pub enum CacheError {
    /// Connection to the store backend failed.
    Connection(String),
    /// Store operation timed out.
    Timeout,
    /// Invalid store configuration.
    Configuration(String),
    /// Internal store error.
    Internal(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "store connection error: {msg}"),
            Self::Timeout => write!(f, "store operation timed out"),
            Self::Configuration(msg) => write!(f, "store configuration error: {msg}"),
            Self::Internal(msg) => write!(f, "internal store error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for store operations.
pub type CacheResult<T> = Result<T, CacheError>;
