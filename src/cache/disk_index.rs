//! Disk Index Module
//!
//! The `index.json` record format for the disk store, key-to-file-name hashing,
//! and load/persist of the whole index.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::cache::entry::{expiry_after, is_past};
use crate::cache::EntrySnapshot;
use crate::error::{CacheError, Result};

/// Name of the index file inside the cache directory
pub const INDEX_FILE_NAME: &str = "index.json";

/// Extension of payload files
pub const PAYLOAD_EXTENSION: &str = "cache";

/// Maps a key to its payload file name: lowercase SHA-256 hex plus `.cache`.
pub fn file_name_for_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{}.{}", hex::encode(digest), PAYLOAD_EXTENSION)
}

/// Whether `name` has the shape of a payload file produced by [`file_name_for_key`].
pub fn is_payload_file_name(name: &str) -> bool {
    match name.strip_suffix(PAYLOAD_EXTENSION).and_then(|s| s.strip_suffix('.')) {
        Some(stem) => stem.len() == 64 && stem.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

// == Disk Cache Entry ==
/// Index record for one payload file. Holds no payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskCacheEntry {
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size: u64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl DiskCacheEntry {
    /// Creates a record for a payload of `size` bytes under `key`, expiring after `ttl`.
    pub fn new(key: &str, size: u64, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            file_name: file_name_for_key(key),
            created_at: now,
            expires_at: expiry_after(now, ttl),
            size,
            access_count: 0,
            last_accessed: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_past(self.expires_at, now)
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    pub fn set_expiration(&mut self, ttl: Duration) {
        self.expires_at = expiry_after(Utc::now(), ttl);
    }

    pub fn snapshot(&self, key: &str) -> EntrySnapshot {
        EntrySnapshot {
            key: key.to_string(),
            size: self.size,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed,
            access_count: self.access_count,
            expires_at: self.expires_at,
            sequence: 0,
        }
    }
}

// == Disk Index ==
/// In-memory copy of `index.json` with a running byte total.
#[derive(Debug, Default, Clone)]
pub struct DiskIndex {
    records: BTreeMap<String, DiskCacheEntry>,
    total_size: u64,
}

impl DiskIndex {
    /// Loads the index at `path`.
    ///
    /// A missing file yields an empty index. An unreadable or unparseable file
    /// also yields an empty index; payload files it described become orphans.
    pub async fn load(path: &Path) -> Self {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no index found, starting empty");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index unreadable, starting empty");
                return Self::default();
            }
        };

        match serde_json::from_slice::<BTreeMap<String, DiskCacheEntry>>(&bytes) {
            Ok(records) => Self::from_records(records),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index corrupt, starting empty");
                Self::default()
            }
        }
    }

    pub fn from_records(records: BTreeMap<String, DiskCacheEntry>) -> Self {
        let total_size = records.values().map(|record| record.size).sum();
        Self {
            records,
            total_size,
        }
    }

    /// Writes the whole index to `path` via a temp file and rename.
    pub async fn persist(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.records)
            .map_err(|e| CacheError::storage("serialize index", e))?;

        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| CacheError::storage("create index temp file", e))?;
        file.write_all(&json)
            .await
            .map_err(|e| CacheError::storage("write index", e))?;
        file.sync_all()
            .await
            .map_err(|e| CacheError::storage("sync index", e))?;
        drop(file);

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| CacheError::storage("replace index", e))
    }

    pub fn get(&self, key: &str) -> Option<&DiskCacheEntry> {
        self.records.get(key)
    }

    /// Mutable access for bookkeeping that does not change `size`.
    pub fn touch(&mut self, key: &str) {
        if let Some(record) = self.records.get_mut(key) {
            record.touch();
        }
    }

    pub fn set_expiration(&mut self, key: &str, ttl: Duration) -> bool {
        match self.records.get_mut(key) {
            Some(record) => {
                record.set_expiration(ttl);
                true
            }
            None => false,
        }
    }

    /// Upserts a record, returning the one it replaced.
    pub fn insert(&mut self, key: String, record: DiskCacheEntry) -> Option<DiskCacheEntry> {
        self.total_size += record.size;
        let previous = self.records.insert(key, record);
        if let Some(old) = &previous {
            self.total_size -= old.size;
        }
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<DiskCacheEntry> {
        let record = self.records.remove(key)?;
        self.total_size -= record.size;
        Some(record)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.total_size = 0;
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DiskCacheEntry)> {
        self.records.iter()
    }

    /// Keys of records expired at `now`.
    pub fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn snapshots_except(&self, key: &str) -> Vec<EntrySnapshot> {
        self.records
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, record)| record.snapshot(k))
            .collect()
    }

    pub fn contains_file(&self, file_name: &str) -> bool {
        self.records
            .values()
            .any(|record| record.file_name == file_name)
    }
}
