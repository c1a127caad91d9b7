//! Configuration Module
//!
//! Handles loading and managing cache configuration, optionally from environment variables.

use std::env;
use std::time::Duration;

use crate::cache::EvictionPolicy;

/// Default capacity in bytes (50 MiB)
pub const DEFAULT_MAX_SIZE: u64 = 50 * 1024 * 1024;

/// Default time-to-live applied to entries stored without an explicit TTL
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// Cache store configuration.
///
/// Supplied once at store construction and immutable for the lifetime of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum total payload size in bytes
    pub max_size: u64,
    /// TTL for entries stored without an explicit one
    pub default_expiration: Duration,
    /// Ordering used when capacity must be reclaimed
    pub eviction_policy: EvictionPolicy,
    /// Whether the secure store seals payloads before handing them to the secret store
    pub use_encryption: bool,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Capacity in bytes (default: 50 MiB)
    /// - `CACHE_DEFAULT_EXPIRATION` - Default TTL in seconds (default: 3600)
    /// - `CACHE_EVICTION_POLICY` - One of `lru`, `lfu`, `fifo`, `ttl` (default: lru)
    /// - `CACHE_USE_ENCRYPTION` - `true`/`false`/`1`/`0` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: env::var("CACHE_MAX_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_size),
            default_expiration: env::var("CACHE_DEFAULT_EXPIRATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_expiration),
            eviction_policy: env::var("CACHE_EVICTION_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.eviction_policy),
            use_encryption: env::var("CACHE_USE_ENCRYPTION")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.use_encryption),
        }
    }

    /// Returns a copy with a different capacity.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Returns a copy with a different default TTL.
    pub fn with_default_expiration(mut self, default_expiration: Duration) -> Self {
        self.default_expiration = default_expiration;
        self
    }

    /// Returns a copy with a different eviction policy.
    pub fn with_eviction_policy(mut self, eviction_policy: EvictionPolicy) -> Self {
        self.eviction_policy = eviction_policy;
        self
    }

    /// Returns a copy with encryption switched on or off.
    pub fn with_encryption(mut self, use_encryption: bool) -> Self {
        self.use_encryption = use_encryption;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_expiration: DEFAULT_EXPIRATION,
            eviction_policy: EvictionPolicy::Lru,
            use_encryption: true,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
