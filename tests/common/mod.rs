//! Shared helpers for integration tests.

use std::sync::{Arc, Once};
use std::time::Duration;

use object_cache::cache::{DiskStore, MemoryStore, ObjectCache, SecureStore};
use object_cache::secrets::{InMemorySecretStore, InMemorySettingsStore};
use object_cache::{CacheConfig, EvictionPolicy};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once; honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn test_config(max_size: u64) -> CacheConfig {
    CacheConfig::default()
        .with_max_size(max_size)
        .with_default_expiration(Duration::from_secs(300))
        .with_eviction_policy(EvictionPolicy::Lru)
        .with_encryption(true)
}

/// One instance of every backend. The temp directory lives as long as this value.
pub struct Backends {
    pub caches: Vec<Arc<dyn ObjectCache>>,
    _dir: TempDir,
}

pub async fn all_backends(max_size: u64) -> anyhow::Result<Backends> {
    init_tracing();
    let dir = TempDir::new()?;
    let config = test_config(max_size);

    let memory = MemoryStore::new(config.clone());
    let disk = DiskStore::open(dir.path().join("disk"), config.clone()).await?;
    let secure = SecureStore::open(
        config,
        Arc::new(InMemorySecretStore::new()),
        Arc::new(InMemorySettingsStore::new()),
    )
    .await?;

    Ok(Backends {
        caches: vec![Arc::new(memory), Arc::new(disk), Arc::new(secure)],
        _dir: dir,
    })
}
