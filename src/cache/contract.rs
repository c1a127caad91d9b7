//! Unified Contract
//!
//! The capability set every backend satisfies, so callers can swap memory, disk
//! and secure stores without code changes.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheExport, CacheStats};
use crate::error::{CacheError, Result};

/// Byte-level cache operations shared by all backends.
///
/// Semantics common to every implementation:
/// - a missing or expired key reads as `None`, never as an error
/// - an expired entry is removed the first time it is touched
/// - `remove` of an absent key succeeds
/// - `clear_all` resets size accounting to zero
/// - `set_expiration` on an absent key fails with [`CacheError::KeyNotFound`]
#[async_trait]
pub trait ObjectCache: Send + Sync {
    /// Stores raw bytes, expiring after `ttl` or the configured default.
    async fn store_data(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Retrieves raw bytes, updating access bookkeeping on a hit.
    async fn retrieve_data(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn clear_all(&self) -> Result<()>;

    /// Sum of the sizes of all entries currently held, in bytes.
    async fn size(&self) -> u64;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys of all unexpired entries, sorted.
    async fn all_keys(&self) -> Result<Vec<String>>;

    /// Resets the expiry of an existing entry to `ttl` from now.
    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Removes every expired entry and returns how many were removed.
    async fn cleanup_expired_entries(&self) -> Result<usize>;

    async fn statistics(&self) -> CacheStats;

    async fn export_all_data(&self) -> Result<CacheExport>;

    /// Short backend identifier, e.g. `"memory"`.
    fn backend_type(&self) -> &str;
}

/// Typed store/retrieve on top of [`ObjectCache`], serializing with serde_json.
#[async_trait]
pub trait ObjectCacheExt: ObjectCache {
    /// Serializes `value` and stores it under `key`.
    async fn store<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::storage("serialize value", e))?;
        self.store_data(key, bytes, ttl).await
    }

    /// Retrieves and deserializes the value under `key`.
    ///
    /// A payload that does not deserialize as `T` is reported as
    /// [`CacheError::CorruptedData`].
    async fn retrieve<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.retrieve_data(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CacheError::CorruptedData(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }
}

impl<C: ObjectCache + ?Sized> ObjectCacheExt for C {}
