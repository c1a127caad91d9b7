//! Secure Store Module
//!
//! Payloads live only in the secret store, addressed by `(service, key)` and
//! optionally sealed with AES-256-GCM. A metadata table without payload bytes is
//! kept in a separate settings store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::crypto::{self, EncryptionKey};
use crate::cache::entry::{expiry_after, is_past};
use crate::cache::{
    CacheExport, CacheStats, EntrySnapshot, EvictionPlan, ExportedEntry, ObjectCache,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::secrets::{SecretStore, SecretStoreError, SettingsStore};

/// Service identifier used when none is supplied
pub const DEFAULT_SERVICE: &str = "object-cache.secure";

/// Secret-store tag of the symmetric key slot
pub const ENCRYPTION_KEY_TAG: &str = "object-cache.encryption-key";

// == Secure Cache Metadata ==
/// Bookkeeping for one secure entry. Never holds payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureCacheMetadata {
    pub key: String,
    /// Plaintext length in bytes
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub is_encrypted: bool,
}

impl SecureCacheMetadata {
    fn new(key: &str, size: u64, ttl: Duration, is_encrypted: bool) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            size,
            created_at: now,
            last_accessed_at: now,
            expires_at: expiry_after(now, ttl),
            access_count: 0,
            is_encrypted,
        }
    }

    pub fn is_expired(&self) -> bool {
        is_past(self.expires_at, Utc::now())
    }

    fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            size: self.size,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            expires_at: self.expires_at,
            sequence: 0,
        }
    }
}

#[derive(Debug)]
struct SecureState {
    metadata: BTreeMap<String, SecureCacheMetadata>,
    key: Option<EncryptionKey>,
    stats: CacheStats,
}

impl SecureState {
    fn total_size(&self) -> u64 {
        self.metadata.values().map(|meta| meta.size).sum()
    }
}

// == Secure Store ==
/// Cache whose payloads are held by a [`SecretStore`].
pub struct SecureStore {
    config: CacheConfig,
    service: String,
    metadata_name: String,
    secrets: Arc<dyn SecretStore>,
    settings: Arc<dyn SettingsStore>,
    state: Mutex<SecureState>,
}

impl SecureStore {
    // == Constructor ==
    /// Opens a store under [`DEFAULT_SERVICE`].
    pub async fn open(
        config: CacheConfig,
        secrets: Arc<dyn SecretStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        Self::open_with_service(DEFAULT_SERVICE, config, secrets, settings).await
    }

    /// Opens a store whose items live under `service`.
    ///
    /// With encryption enabled the key is loaded, or generated and persisted,
    /// here and held for the lifetime of the store.
    pub async fn open_with_service(
        service: impl Into<String>,
        config: CacheConfig,
        secrets: Arc<dyn SecretStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        let service = service.into();
        let metadata_name = format!("{service}.metadata");

        let key = if config.use_encryption {
            Some(crypto::load_or_create_key(secrets.as_ref(), ENCRYPTION_KEY_TAG).await?)
        } else {
            crypto::load_key(secrets.as_ref(), ENCRYPTION_KEY_TAG).await?
        };

        let metadata = load_metadata(settings.as_ref(), &metadata_name).await;

        info!(
            service = %service,
            entries = metadata.len(),
            encryption = config.use_encryption,
            "secure store opened"
        );

        Ok(Self {
            state: Mutex::new(SecureState {
                metadata,
                key,
                stats: CacheStats::new(config.max_size),
            }),
            config,
            service,
            metadata_name,
            secrets,
            settings,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the metadata record without touching access bookkeeping.
    pub async fn metadata(&self, key: &str) -> Option<SecureCacheMetadata> {
        self.state.lock().await.metadata.get(key).cloned()
    }

    async fn persist_metadata(&self, state: &SecureState) -> Result<()> {
        let json = serde_json::to_vec(&state.metadata)
            .map_err(|e| CacheError::storage("serialize metadata", e))?;
        self.settings
            .save(&self.metadata_name, &json)
            .await
            .map_err(|e| CacheError::storage("persist metadata", e))
    }

    async fn persist_quietly(&self, state: &SecureState) {
        if let Err(e) = self.persist_metadata(state).await {
            warn!(error = %e, "failed to persist secure metadata");
        }
    }

    /// Drops metadata and the secret item; a failed delete leaves an orphan
    /// item that the next add for the key replaces.
    async fn discard(&self, state: &mut SecureState, key: &str) -> Option<SecureCacheMetadata> {
        let meta = state.metadata.remove(key)?;
        if let Err(e) = self.secrets.delete(&self.service, key).await {
            warn!(key, error = %e, "failed to delete secret item");
        }
        Some(meta)
    }

    /// Adds an item, replacing an untracked leftover under the same account.
    async fn add_item(&self, key: &str, payload: &[u8]) -> Result<()> {
        match self.secrets.add(&self.service, key, payload).await {
            Ok(()) => Ok(()),
            Err(SecretStoreError::Duplicate { .. }) => {
                self.secrets
                    .delete(&self.service, key)
                    .await
                    .map_err(|e| CacheError::storage("replace secret item", e))?;
                self.secrets
                    .add(&self.service, key, payload)
                    .await
                    .map_err(|e| CacheError::storage("add secret item", e))
            }
            Err(e) => Err(CacheError::storage("add secret item", e)),
        }
    }

    /// Plans the removals that make room for `new_size` bytes under `key`.
    /// Nothing is applied here.
    fn plan_capacity(
        &self,
        state: &SecureState,
        key: &str,
        new_size: u64,
    ) -> Result<EvictionPlan> {
        let retained: u64 = state
            .metadata
            .values()
            .filter(|meta| meta.key != key)
            .map(|meta| meta.size)
            .sum();
        let max_size = self.config.max_size;
        if retained + new_size <= max_size {
            return Ok(EvictionPlan::default());
        }

        let required = retained + new_size - max_size;
        let snapshots = state
            .metadata
            .values()
            .filter(|meta| meta.key != key)
            .map(SecureCacheMetadata::snapshot)
            .collect();
        let plan = self
            .config
            .eviction_policy
            .plan_reclaim(snapshots, required, Utc::now());

        if !plan.satisfies(required) {
            return Err(CacheError::InsufficientSpace {
                required: new_size,
                capacity: max_size,
            });
        }
        Ok(plan)
    }

    async fn apply_plan(&self, state: &mut SecureState, plan: EvictionPlan) {
        if plan.is_empty() {
            return;
        }
        for victim in plan.expired.iter().chain(plan.victims.iter()) {
            self.discard(state, victim).await;
        }
        state.stats.record_expirations(plan.expired.len());
        state.stats.record_evictions(plan.victims.len());
        info!(
            policy = %self.config.eviction_policy,
            expired = plan.expired.len(),
            evicted = plan.victims.len(),
            reclaimed = plan.reclaimed,
            "secure store reclaimed capacity"
        );
    }

    // == Key Rotation ==
    /// Replaces the encryption key and deletes every entry.
    ///
    /// Entries sealed with the old key cannot be recovered afterwards, so they
    /// are removed as part of the rotation.
    pub async fn destroy_and_regenerate_key(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        self.secrets
            .delete_all(&self.service)
            .await
            .map_err(|e| CacheError::storage("delete secret items", e))?;
        let count = state.metadata.len();
        state.metadata.clear();
        self.settings
            .remove(&self.metadata_name)
            .await
            .map_err(|e| CacheError::storage("remove metadata", e))?;

        state.key = Some(crypto::create_key(self.secrets.as_ref(), ENCRYPTION_KEY_TAG).await?);
        warn!(service = %self.service, discarded = count, "encryption key regenerated");
        Ok(())
    }
}

async fn load_metadata(
    settings: &dyn SettingsStore,
    name: &str,
) -> BTreeMap<String, SecureCacheMetadata> {
    match settings.load(name).await {
        Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(name, error = %e, "secure metadata corrupt, starting empty");
            BTreeMap::new()
        }),
        Ok(None) => BTreeMap::new(),
        Err(e) => {
            warn!(name, error = %e, "secure metadata unreadable, starting empty");
            BTreeMap::new()
        }
    }
}

#[async_trait]
impl ObjectCache for SecureStore {
    async fn store_data(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let size = data.len() as u64;
        if size > self.config.max_size {
            return Err(CacheError::InsufficientSpace {
                required: size,
                capacity: self.config.max_size,
            });
        }

        let mut state = self.state.lock().await;

        let plan = self.plan_capacity(&state, key, size)?;

        let payload = if self.config.use_encryption {
            let key_handle = state.key.as_ref().ok_or_else(|| {
                CacheError::StorageFailure("encryption key unavailable".to_string())
            })?;
            key_handle.seal(&data)?
        } else {
            data
        };

        // Replacing a key is delete-then-add; metadata is only touched once the
        // new item is in place.
        if state.metadata.contains_key(key) {
            self.secrets
                .delete(&self.service, key)
                .await
                .map_err(|e| CacheError::storage("delete previous secret item", e))?;
        }
        self.add_item(key, &payload).await?;

        self.apply_plan(&mut state, plan).await;

        let ttl = ttl.unwrap_or(self.config.default_expiration);
        state.metadata.insert(
            key.to_string(),
            SecureCacheMetadata::new(key, size, ttl, self.config.use_encryption),
        );
        self.persist_metadata(&state).await?;

        debug!(key, size, encrypted = self.config.use_encryption, "stored secure entry");
        Ok(())
    }

    async fn retrieve_data(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;

        let Some(meta) = state.metadata.get(key).cloned() else {
            state.stats.record_miss();
            return Ok(None);
        };

        if meta.is_expired() {
            self.discard(&mut state, key).await;
            state.stats.record_expirations(1);
            state.stats.record_miss();
            self.persist_quietly(&state).await;
            debug!(key, "secure entry expired");
            return Ok(None);
        }

        let stored = self
            .secrets
            .query(&self.service, key)
            .await
            .map_err(|e| CacheError::retrieval("query secret item", e))?;

        let Some(stored) = stored else {
            warn!(key, "secret item missing, purging stale metadata");
            state.metadata.remove(key);
            state.stats.record_miss();
            self.persist_quietly(&state).await;
            return Ok(None);
        };

        let data = if meta.is_encrypted {
            let key_handle = state.key.as_ref().ok_or_else(|| {
                CacheError::CorruptedData(format!("{key}: entry is encrypted but no key is available"))
            })?;
            key_handle.open(&stored)?
        } else {
            stored
        };

        if let Some(record) = state.metadata.get_mut(key) {
            record.last_accessed_at = Utc::now();
            record.access_count += 1;
        }
        state.stats.record_hit();
        self.persist_quietly(&state).await;
        Ok(Some(data))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        self.secrets
            .delete(&self.service, key)
            .await
            .map_err(|e| CacheError::storage("delete secret item", e))?;

        if state.metadata.remove(key).is_some() {
            self.persist_metadata(&state).await?;
            debug!(key, "removed secure entry");
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        self.secrets
            .delete_all(&self.service)
            .await
            .map_err(|e| CacheError::storage("delete secret items", e))?;

        let count = state.metadata.len();
        state.metadata.clear();
        self.persist_metadata(&state).await?;
        info!(count, service = %self.service, "cleared secure store");
        Ok(())
    }

    async fn size(&self) -> u64 {
        self.state.lock().await.total_size()
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;

        let Some(meta) = state.metadata.get(key) else {
            return Ok(false);
        };

        if meta.is_expired() {
            self.discard(&mut state, key).await;
            state.stats.record_expirations(1);
            self.persist_quietly(&state).await;
            return Ok(false);
        }

        let present = self
            .secrets
            .query(&self.service, key)
            .await
            .map_err(|e| CacheError::retrieval("query secret item", e))?
            .is_some();
        if !present {
            warn!(key, "secret item missing, purging stale metadata");
            state.metadata.remove(key);
            self.persist_quietly(&state).await;
        }
        Ok(present)
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .metadata
            .values()
            .filter(|meta| !meta.is_expired())
            .map(|meta| meta.key.clone())
            .collect())
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().await;

        match state.metadata.get(key).map(SecureCacheMetadata::is_expired) {
            Some(false) => {
                if let Some(meta) = state.metadata.get_mut(key) {
                    meta.expires_at = expiry_after(Utc::now(), ttl);
                }
                self.persist_metadata(&state).await
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
        let expired: Vec<String> = state
            .metadata
            .values()
            .filter(|meta| meta.is_expired())
            .map(|meta| meta.key.clone())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        for key in &expired {
            self.discard(&mut state, key).await;
        }
        state.stats.record_expirations(expired.len());
        self.persist_metadata(&state).await?;

        info!(removed = expired.len(), "secure store removed expired entries");
        Ok(expired.len())
    }

    async fn statistics(&self) -> CacheStats {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.set_occupancy(state.metadata.len(), state.total_size());
        stats
    }

    /// Exports metadata only; payloads are never included.
    async fn export_all_data(&self) -> Result<CacheExport> {
        let state = self.state.lock().await;
        let entries = state
            .metadata
            .values()
            .filter(|meta| !meta.is_expired())
            .map(|meta| ExportedEntry {
                key: meta.key.clone(),
                size: meta.size,
                created_at: meta.created_at,
                last_accessed_at: meta.last_accessed_at,
                expires_at: meta.expires_at,
                access_count: meta.access_count,
                encrypted: meta.is_encrypted,
                payload_hex: None,
            })
            .collect();
        Ok(CacheExport::new(self.backend_type(), entries))
    }

    fn backend_type(&self) -> &str {
        "secure"
    }
}
