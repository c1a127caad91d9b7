//! Settings Store
//!
//! Durable named-blob storage. The secure store keeps its metadata table here,
//! away from the secret store.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;

/// Persisted key-value blobs.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the blob stored under `name`.
    async fn save(&self, name: &str, blob: &[u8]) -> io::Result<()>;

    async fn remove(&self, name: &str) -> io::Result<()>;
}

// == In-Memory Settings ==
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(name).cloned())
    }

    async fn save(&self, name: &str, blob: &[u8]) -> io::Result<()> {
        self.blobs.lock().insert(name.to_string(), blob.to_vec());
        Ok(())
    }

    async fn remove(&self, name: &str) -> io::Result<()> {
        self.blobs.lock().remove(name);
        Ok(())
    }
}

// == File Settings ==
/// One `<name>.json` file per blob inside a directory.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    directory: PathBuf,
}

impl FileSettingsStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.directory.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, name: &str, blob: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.directory).await?;
        let path = self.path_for(name);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, blob).await?;
        fs::rename(&temp_path, &path).await
    }

    async fn remove(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(name)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
