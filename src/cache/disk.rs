//! Disk Store Module
//!
//! Persistent cache: one payload file per entry, named by a hash of the key,
//! plus a single `index.json` describing every entry. Inconsistencies between
//! the index and the files on disk are repaired lazily as cache misses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::disk_index::{
    file_name_for_key, is_payload_file_name, DiskCacheEntry, DiskIndex, INDEX_FILE_NAME,
};
use crate::cache::{CacheExport, CacheStats, ExportedEntry, ObjectCache};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Fraction of `max_size` the store evicts down to once it overflows.
pub const EVICTION_TARGET_RATIO: f64 = 0.8;

const HEALTH_PROBE_FILE: &str = ".health-probe";

// == Health Report ==
/// Read-only diagnosis of a disk store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub directory_writable: bool,
    pub indexed_entries: usize,
    /// Keys whose payload file is missing
    pub missing_files: Vec<String>,
    /// Payload files no index record points at
    pub orphaned_files: usize,
    pub total_bytes: u64,
    pub issues: Vec<String>,
}

#[derive(Debug)]
struct DiskState {
    index: DiskIndex,
    stats: CacheStats,
}

// == Disk Store ==
/// File-backed cache with a JSON index.
#[derive(Debug)]
pub struct DiskStore {
    config: CacheConfig,
    directory: PathBuf,
    index_path: PathBuf,
    state: Mutex<DiskState>,
}

impl DiskStore {
    // == Constructor ==
    /// Opens (or creates) a store rooted at `directory`.
    ///
    /// Fails with [`CacheError::InvalidCacheDirectory`] when the directory cannot
    /// be created. A corrupt index never fails construction.
    pub async fn open(directory: impl Into<PathBuf>, config: CacheConfig) -> Result<Self> {
        let directory = directory.into();

        if let Ok(metadata) = fs::metadata(&directory).await {
            if !metadata.is_dir() {
                return Err(CacheError::InvalidCacheDirectory(format!(
                    "{} is not a directory",
                    directory.display()
                )));
            }
        }

        fs::create_dir_all(&directory).await.map_err(|e| {
            CacheError::InvalidCacheDirectory(format!("{}: {e}", directory.display()))
        })?;

        let index_path = directory.join(INDEX_FILE_NAME);
        let index = DiskIndex::load(&index_path).await;

        info!(
            directory = %directory.display(),
            entries = index.len(),
            bytes = index.total_size(),
            "disk store opened"
        );

        Ok(Self {
            state: Mutex::new(DiskState {
                index,
                stats: CacheStats::new(config.max_size),
            }),
            config,
            directory,
            index_path,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Path of the payload file that backs `key`.
    pub fn payload_path(&self, key: &str) -> PathBuf {
        self.directory.join(file_name_for_key(key))
    }

    // == Payload I/O ==
    async fn write_payload(&self, file_name: &str, data: &[u8]) -> Result<()> {
        let path = self.directory.join(file_name);
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| CacheError::storage("create payload file", e))?;
        file.write_all(data)
            .await
            .map_err(|e| CacheError::storage("write payload", e))?;
        file.sync_all()
            .await
            .map_err(|e| CacheError::storage("sync payload", e))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| CacheError::storage("replace payload", e))
    }

    async fn delete_payload(&self, file_name: &str) {
        match fs::remove_file(self.directory.join(file_name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file_name, error = %e, "failed to delete payload file"),
        }
    }

    /// Drops the record and its payload file.
    async fn discard(&self, state: &mut DiskState, key: &str) -> Option<DiskCacheEntry> {
        let record = state.index.remove(key)?;
        self.delete_payload(&record.file_name).await;
        Some(record)
    }

    async fn persist(&self, state: &DiskState) -> Result<()> {
        state.index.persist(&self.index_path).await
    }

    /// Persists bookkeeping that a caller's result does not depend on.
    async fn persist_quietly(&self, state: &DiskState) {
        if let Err(e) = self.persist(state).await {
            warn!(error = %e, "failed to persist disk index");
        }
    }

    async fn payload_file_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|e| CacheError::retrieval("list cache directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::retrieval("list cache directory", e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if is_payload_file_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    // == Capacity Enforcement ==
    /// Evicts down to the hysteresis target once total size exceeds `max_size`.
    ///
    /// `protected` (the entry just written) is never chosen.
    async fn enforce_capacity(&self, state: &mut DiskState, protected: &str) -> usize {
        let total = state.index.total_size();
        if total <= self.config.max_size {
            return 0;
        }

        let target = (self.config.max_size as f64 * EVICTION_TARGET_RATIO) as u64;
        let required = total - target;
        let plan = self.config.eviction_policy.plan_reclaim(
            state.index.snapshots_except(protected),
            required,
            Utc::now(),
        );

        for key in plan.expired.iter().chain(plan.victims.iter()) {
            self.discard(state, key).await;
        }
        state.stats.record_expirations(plan.expired.len());
        state.stats.record_evictions(plan.victims.len());

        info!(
            policy = %self.config.eviction_policy,
            expired = plan.expired.len(),
            evicted = plan.victims.len(),
            total_bytes = state.index.total_size(),
            target,
            "disk store reclaimed capacity"
        );
        plan.len()
    }

    // == Health ==
    /// Checks directory writability and index/file consistency without repairing.
    pub async fn check_health(&self) -> Result<HealthReport> {
        let state = self.state.lock().await;
        let mut issues = Vec::new();

        let probe = self.directory.join(HEALTH_PROBE_FILE);
        let directory_writable = match fs::write(&probe, b"ok").await {
            Ok(()) => {
                if let Err(e) = fs::remove_file(&probe).await {
                    warn!(error = %e, "failed to remove health probe file");
                }
                true
            }
            Err(e) => {
                issues.push(format!("cache directory not writable: {e}"));
                false
            }
        };

        let mut missing_files = Vec::new();
        for (key, record) in state.index.iter() {
            let exists = fs::try_exists(self.directory.join(&record.file_name))
                .await
                .unwrap_or(false);
            if !exists {
                missing_files.push(key.clone());
            }
        }
        if !missing_files.is_empty() {
            issues.push(format!(
                "{} index records point at missing files",
                missing_files.len()
            ));
        }

        let orphaned_files = self
            .payload_file_names()
            .await?
            .iter()
            .filter(|name| !state.index.contains_file(name))
            .count();
        if orphaned_files > 0 {
            issues.push(format!("{orphaned_files} payload files are not indexed"));
        }

        if state.index.total_size() > self.config.max_size {
            issues.push("total size exceeds capacity".to_string());
        }

        Ok(HealthReport {
            healthy: issues.is_empty(),
            directory_writable,
            indexed_entries: state.index.len(),
            missing_files,
            orphaned_files,
            total_bytes: state.index.total_size(),
            issues,
        })
    }

    // == Orphan Sweep ==
    /// Deletes payload files that no index record references.
    pub async fn remove_orphaned_files(&self) -> Result<usize> {
        let state = self.state.lock().await;
        let mut removed = 0;
        for name in self.payload_file_names().await? {
            if !state.index.contains_file(&name) {
                self.delete_payload(&name).await;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "removed orphaned payload files");
        }
        Ok(removed)
    }
}

#[async_trait]
impl ObjectCache for DiskStore {
    async fn store_data(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let size = data.len() as u64;
        if size > self.config.max_size {
            return Err(CacheError::InsufficientSpace {
                required: size,
                capacity: self.config.max_size,
            });
        }

        let mut state = self.state.lock().await;

        let ttl = ttl.unwrap_or(self.config.default_expiration);
        let record = DiskCacheEntry::new(key, size, ttl);
        self.write_payload(&record.file_name, &data).await?;

        state.index.insert(key.to_string(), record);
        if let Err(e) = self.persist(&state).await {
            // the previous payload for this key is already overwritten
            self.discard(&mut state, key).await;
            warn!(key, error = %e, "index write failed, dropped new entry");
            return Err(e);
        }
        debug!(key, size, "stored entry on disk");

        if self.enforce_capacity(&mut state, key).await > 0 {
            self.persist(&state).await?;
        }
        Ok(())
    }

    async fn retrieve_data(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;

        let Some(record) = state.index.get(key).cloned() else {
            state.stats.record_miss();
            debug!(key, "disk cache miss");
            return Ok(None);
        };

        if record.is_expired() {
            self.discard(&mut state, key).await;
            state.stats.record_expirations(1);
            state.stats.record_miss();
            self.persist_quietly(&state).await;
            debug!(key, "disk entry expired");
            return Ok(None);
        }

        match fs::read(self.directory.join(&record.file_name)).await {
            Ok(data) => {
                state.index.touch(key);
                state.stats.record_hit();
                self.persist_quietly(&state).await;
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key, file_name = %record.file_name, "payload file missing, purging index record");
                state.index.remove(key);
                state.stats.record_miss();
                self.persist_quietly(&state).await;
                Ok(None)
            }
            Err(e) => Err(CacheError::retrieval("read payload", e)),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.discard(&mut state, key).await.is_some() {
            self.persist(&state).await?;
            debug!(key, "removed entry from disk");
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let file_names: Vec<String> = state
            .index
            .iter()
            .map(|(_, record)| record.file_name.clone())
            .collect();
        for name in file_names {
            self.delete_payload(&name).await;
        }
        for name in self.payload_file_names().await? {
            self.delete_payload(&name).await;
        }

        let count = state.index.len();
        state.index.clear();
        self.persist(&state).await?;
        info!(count, directory = %self.directory.display(), "cleared disk store");
        Ok(())
    }

    async fn size(&self) -> u64 {
        self.state.lock().await.index.total_size()
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;

        let Some(record) = state.index.get(key).cloned() else {
            return Ok(false);
        };

        if record.is_expired() {
            self.discard(&mut state, key).await;
            state.stats.record_expirations(1);
            self.persist_quietly(&state).await;
            return Ok(false);
        }

        let present = fs::try_exists(self.directory.join(&record.file_name))
            .await
            .map_err(|e| CacheError::retrieval("stat payload", e))?;
        if !present {
            warn!(key, "payload file missing, purging index record");
            state.index.remove(key);
            self.persist_quietly(&state).await;
        }
        Ok(present)
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let now = Utc::now();
        Ok(state
            .index
            .iter()
            .filter(|(_, record)| !record.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().await;

        match state.index.get(key).map(DiskCacheEntry::is_expired) {
            Some(false) => {
                state.index.set_expiration(key, ttl);
                self.persist(&state).await
            }
            Some(true) => {
                self.discard(&mut state, key).await;
                state.stats.record_expirations(1);
                self.persist_quietly(&state).await;
                Err(CacheError::KeyNotFound(key.to_string()))
            }
            None => Err(CacheError::KeyNotFound(key.to_string())),
        }
    }

    async fn cleanup_expired_entries(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let expired = state.index.expired_keys(Utc::now());
        if expired.is_empty() {
            return Ok(0);
        }

        for key in &expired {
            self.discard(&mut state, key).await;
        }
        state.stats.record_expirations(expired.len());
        self.persist(&state).await?;

        info!(removed = expired.len(), "disk store removed expired entries");
        Ok(expired.len())
    }

    async fn statistics(&self) -> CacheStats {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.set_occupancy(state.index.len(), state.index.total_size());
        stats
    }

    async fn export_all_data(&self) -> Result<CacheExport> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut entries = Vec::with_capacity(state.index.len());

        for (key, record) in state.index.iter() {
            if record.is_expired_at(now) {
                continue;
            }
            let data = match fs::read(self.directory.join(&record.file_name)).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(key = %key, "skipping export of entry with missing payload");
                    continue;
                }
                Err(e) => return Err(CacheError::retrieval("read payload for export", e)),
            };
            entries.push(ExportedEntry {
                key: key.clone(),
                size: record.size,
                created_at: record.created_at,
                last_accessed_at: record.last_accessed,
                expires_at: record.expires_at,
                access_count: record.access_count,
                encrypted: false,
                payload_hex: Some(hex::encode(&data)),
            });
        }

        Ok(CacheExport::new(self.backend_type(), entries))
    }

    fn backend_type(&self) -> &str {
        "disk"
    }
}
