//! Cache Entry Module
//!
//! Defines the value envelope held by the memory store, with TTL and access bookkeeping.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::eviction::EntrySnapshot;

// == Content Type ==
/// Coarse classification of what an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    Document,
    Temporary,
    UserData,
    Image,
    #[default]
    Generic,
}

// == Cache Entry ==
/// Represents a single cache entry with payload and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The key this entry is stored under
    pub key: String,
    /// Serialized payload
    pub data: Vec<u8>,
    /// Classification of the payload
    pub content_type: ContentType,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last successful retrieval (creation time until first read)
    pub last_accessed_at: DateTime<Utc>,
    /// Expiration timestamp, None = no expiration
    pub expires_at: Option<DateTime<Utc>>,
    /// Number of successful retrievals
    pub access_count: u64,
    /// Cached `data.len()`
    pub size: u64,
    /// Insertion order within the owning store
    pub sequence: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry expiring `ttl` from now.
    ///
    /// # Arguments
    /// * `key` - The key the entry is stored under
    /// * `data` - The serialized payload
    /// * `content_type` - Payload classification
    /// * `ttl` - Time to live
    /// * `sequence` - Insertion order assigned by the store
    pub fn new(
        key: String,
        data: Vec<u8>,
        content_type: ContentType,
        ttl: Duration,
        sequence: u64,
    ) -> Self {
        let now = Utc::now();
        let size = data.len() as u64;

        Self {
            key,
            data,
            content_type,
            created_at: now,
            last_accessed_at: now,
            expires_at: expiry_after(now, ttl),
            access_count: 0,
            size,
            sequence,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is strictly past `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Checks expiry against a caller-supplied clock reading.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_past(self.expires_at, now)
    }

    // == Touch ==
    /// Records a successful retrieval.
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }

    // == Set Expiration ==
    /// Resets the expiry to `ttl` from now.
    pub fn set_expiration(&mut self, ttl: Duration) {
        self.expires_at = expiry_after(Utc::now(), ttl);
    }

    // == Time To Live ==
    /// Returns remaining TTL, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the entry has expired
    /// - `Some(remaining)` if the entry has TTL and hasn't expired
    /// - `None` if the entry never expires
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.map(|expires| {
            (expires - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Returns the view of this entry the eviction policy works on.
    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            size: self.size,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            expires_at: self.expires_at,
            sequence: self.sequence,
        }
    }
}

// == Utility Functions ==
/// Computes `now + ttl`, or None when the sum overflows the calendar.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}

/// True when `expires_at` is set and `now` is strictly past it.
pub fn is_past(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expires) => now > expires,
        None => false,
    }
}
