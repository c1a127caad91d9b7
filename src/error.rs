//! Error types for the cache stores
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for every cache backend.
///
/// Callers should treat any of these as a cache miss for correctness purposes.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation requires an existing entry (only `set_expiration` reports this)
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A single entry cannot fit even after evicting everything else
    #[error("Insufficient space: entry of {required} bytes exceeds capacity of {capacity} bytes")]
    InsufficientSpace { required: u64, capacity: u64 },

    /// Payload failed to deserialize or decrypt
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Underlying file or secret-store write failed
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Underlying file or secret-store read failed
    #[error("Retrieval failure: {0}")]
    RetrievalFailure(String),

    /// Disk store cannot establish its root directory
    #[error("Invalid cache directory: {0}")]
    InvalidCacheDirectory(String),
}

impl CacheError {
    /// Builds a `StorageFailure` from any displayable cause.
    pub fn storage(context: &str, cause: impl std::fmt::Display) -> Self {
        CacheError::StorageFailure(format!("{context}: {cause}"))
    }

    /// Builds a `RetrievalFailure` from any displayable cause.
    pub fn retrieval(context: &str, cause: impl std::fmt::Display) -> Self {
        CacheError::RetrievalFailure(format!("{context}: {cause}"))
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
