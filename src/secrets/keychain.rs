//! Secret Store
//!
//! Keychain-like boundary used by the secure store: items addressed by
//! `(service, account)` with add/query/delete, plus fixed-tag key slots.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Errors reported by a secret store.
#[derive(Error, Debug)]
pub enum SecretStoreError {
    /// `add` on an existing item; the store has no upsert
    #[error("Item already exists: {service}/{account}")]
    Duplicate { service: String, account: String },

    /// The store refused the operation (locked, denied, unavailable)
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),

    #[error("Secret store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted secrets could not be decoded
    #[error("Secret store data malformed: {0}")]
    Malformed(String),
}

/// Keychain-equivalent capability.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Adds a new item. Fails with [`SecretStoreError::Duplicate`] if one exists.
    async fn add(&self, service: &str, account: &str, data: &[u8])
        -> Result<(), SecretStoreError>;

    async fn query(&self, service: &str, account: &str)
        -> Result<Option<Vec<u8>>, SecretStoreError>;

    /// Deletes an item. Deleting an absent item succeeds.
    async fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError>;

    /// Deletes every item of `service`. Key slots are untouched.
    async fn delete_all(&self, service: &str) -> Result<(), SecretStoreError>;

    async fn load_key(&self, tag: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;

    /// Writes the key slot for `tag`, replacing any previous content.
    async fn save_key(&self, tag: &str, key: &[u8]) -> Result<(), SecretStoreError>;
}

// == In-Memory Secret Store ==
/// Process-local secret store, for tests and platforms without a keychain.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    items: Mutex<HashMap<(String, String), Vec<u8>>>,
    keys: Mutex<HashMap<String, Vec<u8>>>,
    locked: AtomicBool,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a locked keychain: every operation fails while set.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    /// Number of items across all services.
    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    fn check_unlocked(&self) -> Result<(), SecretStoreError> {
        if self.locked.load(Ordering::SeqCst) {
            Err(SecretStoreError::Unavailable("secret store is locked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn add(
        &self,
        service: &str,
        account: &str,
        data: &[u8],
    ) -> Result<(), SecretStoreError> {
        self.check_unlocked()?;
        let mut items = self.items.lock();
        let slot = (service.to_string(), account.to_string());
        if items.contains_key(&slot) {
            return Err(SecretStoreError::Duplicate {
                service: service.to_string(),
                account: account.to_string(),
            });
        }
        items.insert(slot, data.to_vec());
        Ok(())
    }

    async fn query(
        &self,
        service: &str,
        account: &str,
    ) -> Result<Option<Vec<u8>>, SecretStoreError> {
        self.check_unlocked()?;
        Ok(self
            .items
            .lock()
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    async fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        self.check_unlocked()?;
        self.items
            .lock()
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }

    async fn delete_all(&self, service: &str) -> Result<(), SecretStoreError> {
        self.check_unlocked()?;
        self.items.lock().retain(|(s, _), _| s != service);
        Ok(())
    }

    async fn load_key(&self, tag: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        self.check_unlocked()?;
        Ok(self.keys.lock().get(tag).cloned())
    }

    async fn save_key(&self, tag: &str, key: &[u8]) -> Result<(), SecretStoreError> {
        self.check_unlocked()?;
        self.keys.lock().insert(tag.to_string(), key.to_vec());
        Ok(())
    }
}

// == File Secret Store ==
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SecretFile {
    /// service -> account -> hex payload
    items: BTreeMap<String, BTreeMap<String, String>>,
    /// tag -> hex key
    keys: BTreeMap<String, String>,
}

/// Secret store persisted as one owner-only JSON file.
///
/// Items are written hex-encoded; confidentiality comes from the secure store
/// sealing payloads and from file permissions.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    contents: AsyncMutex<SecretFile>,
}

impl FileSecretStore {
    /// Opens the store at `path`, creating it on first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SecretStoreError> {
        let path = path.into();
        let contents = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SecretStoreError::Malformed(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SecretFile::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            contents: AsyncMutex::new(contents),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, contents: &SecretFile) -> Result<(), SecretStoreError> {
        let json = serde_json::to_vec_pretty(contents)
            .map_err(|e| SecretStoreError::Malformed(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).await?;
        restrict_permissions(&temp_path).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), "secret file written");
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn decode(value: &str) -> Result<Vec<u8>, SecretStoreError> {
    hex::decode(value).map_err(|e| SecretStoreError::Malformed(e.to_string()))
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn add(
        &self,
        service: &str,
        account: &str,
        data: &[u8],
    ) -> Result<(), SecretStoreError> {
        let mut contents = self.contents.lock().await;
        let mut next = contents.clone();
        let accounts = next.items.entry(service.to_string()).or_default();
        if accounts.contains_key(account) {
            return Err(SecretStoreError::Duplicate {
                service: service.to_string(),
                account: account.to_string(),
            });
        }
        accounts.insert(account.to_string(), hex::encode(data));
        self.save(&next).await?;
        *contents = next;
        Ok(())
    }

    async fn query(
        &self,
        service: &str,
        account: &str,
    ) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let contents = self.contents.lock().await;
        contents
            .items
            .get(service)
            .and_then(|accounts| accounts.get(account))
            .map(|value| decode(value))
            .transpose()
    }

    async fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        let mut contents = self.contents.lock().await;
        let mut next = contents.clone();
        let removed = next
            .items
            .get_mut(service)
            .and_then(|accounts| accounts.remove(account))
            .is_some();
        if removed {
            self.save(&next).await?;
            *contents = next;
        }
        Ok(())
    }

    async fn delete_all(&self, service: &str) -> Result<(), SecretStoreError> {
        let mut contents = self.contents.lock().await;
        let mut next = contents.clone();
        if next.items.remove(service).is_some() {
            self.save(&next).await?;
            *contents = next;
        }
        Ok(())
    }

    async fn load_key(&self, tag: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let contents = self.contents.lock().await;
        contents.keys.get(tag).map(|value| decode(value)).transpose()
    }

    async fn save_key(&self, tag: &str, key: &[u8]) -> Result<(), SecretStoreError> {
        let mut contents = self.contents.lock().await;
        let mut next = contents.clone();
        next.keys.insert(tag.to_string(), hex::encode(key));
        self.save(&next).await?;
        *contents = next;
        Ok(())
    }
}
