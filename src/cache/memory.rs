//! Memory Store Module
//!
//! Process-local cache engine: a HashMap of entries with byte accounting,
//! policy-driven eviction and lazy TTL expiration.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::{
    CacheEntry, CacheExport, CacheStats, ContentType, EntrySnapshot, ExportedEntry, ObjectCache,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Memory State ==
/// Everything guarded by the store's lock.
#[derive(Debug)]
struct MemoryState {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Sum of `size` over `entries`
    current_size: u64,
    /// Next insertion sequence number
    next_sequence: u64,
    /// Performance statistics
    stats: CacheStats,
}

impl MemoryState {
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.current_size -= entry.size;
        Some(entry)
    }

    fn snapshots_except(&self, key: &str) -> Vec<EntrySnapshot> {
        self.entries
            .values()
            .filter(|entry| entry.key != key)
            .map(CacheEntry::snapshot)
            .collect()
    }

    fn sweep_expired(&mut self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }
        self.stats.record_expirations(expired.len());
        expired.len()
    }
}

// == Memory Store ==
/// In-memory cache with size-bounded capacity and TTL support.
#[derive(Debug)]
pub struct MemoryStore {
    config: CacheConfig,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates an empty store bounded by `config.max_size` bytes.
    pub fn new(config: CacheConfig) -> Self {
        let stats = CacheStats::new(config.max_size);
        Self {
            config,
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                current_size: 0,
                next_sequence: 0,
                stats,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // == Store ==
    /// Stores a payload with an explicit content classification.
    ///
    /// If the key already exists its old size is released first. When the
    /// insert would exceed capacity, expired entries are dropped and the
    /// configured policy evicts until the new payload fits exactly.
    pub async fn store_data_as(
        &self,
        key: &str,
        data: Vec<u8>,
        ttl: Option<Duration>,
        content_type: ContentType,
    ) -> Result<()> {
        let new_size = data.len() as u64;
        let max_size = self.config.max_size;

        if new_size > max_size {
            return Err(CacheError::InsufficientSpace {
                required: new_size,
                capacity: max_size,
            });
        }

        let mut state = self.state.lock().await;

        let replaced_size = state.entries.get(key).map(|entry| entry.size).unwrap_or(0);
        let retained_size = state.current_size - replaced_size;

        if retained_size + new_size > max_size {
            let required = retained_size + new_size - max_size;
            let plan = self.config.eviction_policy.plan_reclaim(
                state.snapshots_except(key),
                required,
                Utc::now(),
            );

            if !plan.satisfies(required) {
                return Err(CacheError::InsufficientSpace {
                    required: new_size,
                    capacity: max_size,
                });
            }

            for victim in plan.expired.iter().chain(plan.victims.iter()) {
                state.remove_entry(victim);
            }
            state.stats.record_expirations(plan.expired.len());
            state.stats.record_evictions(plan.victims.len());

            info!(
                policy = %self.config.eviction_policy,
                expired = plan.expired.len(),
                evicted = plan.victims.len(),
                reclaimed = plan.reclaimed,
                "memory store reclaimed capacity"
            );
        }

        state.remove_entry(key);

        let ttl = ttl.unwrap_or(self.config.default_expiration);
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let entry = CacheEntry::new(key.to_string(), data, content_type, ttl, sequence);
        state.current_size += entry.size;
        state.entries.insert(key.to_string(), entry);

        debug!(key, size = new_size, "stored entry in memory");
        Ok(())
    }

    // == Peek ==
    /// Returns a copy of the entry without touching access bookkeeping.
    ///
    /// Expired entries are reported as absent but not removed.
    pub async fn peek_entry(&self, key: &str) -> Option<CacheEntry> {
        let state = self.state.lock().await;
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    // == Length ==
    /// Returns the current number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }
}

#[async_trait]
impl ObjectCache for MemoryStore {
    async fn store_data(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.store_data_as(key, data, ttl, ContentType::Generic).await
    }

    async fn retrieve_data(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;

        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                state.stats.record_miss();
                debug!(key, "memory cache miss");
                return Ok(None);
            }
        };

        if expired {
            state.remove_entry(key);
            state.stats.record_expirations(1);
            state.stats.record_miss();
            debug!(key, "memory entry expired");
            return Ok(None);
        }

        let data = state.entries.get_mut(key).map(|entry| {
            entry.touch();
            entry.data.clone()
        });
        state.stats.record_hit();
        Ok(data)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.remove_entry(key).is_some() {
            debug!(key, "removed entry from memory");
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let count = state.entries.len();
        state.entries.clear();
        state.current_size = 0;
        info!(count, "cleared memory store");
        Ok(())
    }

    async fn size(&self) -> u64 {
        self.state.lock().await.current_size
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.entries.get(key).map(CacheEntry::is_expired) {
            Some(false) => Ok(true),
            Some(true) => {
                state.remove_entry(key);
                state.stats.record_expirations(1);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut keys: Vec<String> = state
            .entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.entries.get(key).map(CacheEntry::is_expired) {
            Some(false) => {
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.set_expiration(ttl);
                }
                Ok(())
            }
            Some(true) => {
                state.remove_entry(key);
                state.stats.record_expirations(1);
                Err(CacheError::KeyNotFound(key.to_string()))
            }
            None => Err(CacheError::KeyNotFound(key.to_string())),
        }
    }

    async fn cleanup_expired_entries(&self) -> Result<usize> {
        let removed = self.state.lock().await.sweep_expired();
        if removed > 0 {
            info!(removed, "memory store removed expired entries");
        }
        Ok(removed)
    }

    async fn statistics(&self) -> CacheStats {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.set_occupancy(state.entries.len(), state.current_size);
        stats
    }

    async fn export_all_data(&self) -> Result<CacheExport> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let entries = state
            .entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| ExportedEntry {
                key: entry.key.clone(),
                size: entry.size,
                created_at: entry.created_at,
                last_accessed_at: entry.last_accessed_at,
                expires_at: entry.expires_at,
                access_count: entry.access_count,
                encrypted: false,
                payload_hex: Some(hex::encode(&entry.data)),
            })
            .collect();
        Ok(CacheExport::new(self.backend_type(), entries))
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}
