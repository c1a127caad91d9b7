//! Integration Tests for Cache Backends
//!
//! Runs the shared contract against every backend, then backend-specific
//! scenarios through the public API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use object_cache::cache::{
    ContentType, DiskStore, MemoryStore, ObjectCache, ObjectCacheExt, SecureStore, DEFAULT_SERVICE,
};
use object_cache::secrets::{FileSecretStore, FileSettingsStore, SecretStore};
use object_cache::{spawn_cleanup_task, CacheError, EvictionPolicy};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use common::{all_backends, init_tracing, test_config};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: u32,
}

// == Contract Tests ==

#[tokio::test]
async fn test_round_trip_on_every_backend() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        cache.store_data("greeting", b"hello".to_vec(), None).await?;

        assert_eq!(
            cache.retrieve_data("greeting").await?,
            Some(b"hello".to_vec()),
            "backend {}",
            cache.backend_type()
        );
        assert!(cache.exists("greeting").await?);
        assert_eq!(cache.size().await, 5);
        assert_eq!(cache.all_keys().await?, vec!["greeting".to_string()]);
    }
    Ok(())
}

#[tokio::test]
async fn test_empty_payload_is_a_hit() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        cache.store_data("empty", Vec::new(), None).await?;
        assert_eq!(
            cache.retrieve_data("empty").await?,
            Some(Vec::new()),
            "backend {}",
            cache.backend_type()
        );
        assert_eq!(cache.statistics().await.hits, 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_typed_values_on_every_backend() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;
    let profile = Profile {
        name: "ada".to_string(),
        visits: 3,
    };

    for cache in &backends.caches {
        cache.store("profile", &profile, None).await?;
        let loaded: Option<Profile> = cache.retrieve("profile").await?;
        assert_eq!(loaded.as_ref(), Some(&profile), "backend {}", cache.backend_type());

        cache.store_data("garbage", b"{not json".to_vec(), None).await?;
        let result = cache.retrieve::<Profile>("garbage").await;
        assert!(matches!(result, Err(CacheError::CorruptedData(_))));
    }
    Ok(())
}

#[tokio::test]
async fn test_overwrite_replaces_size() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        cache.store_data("k", vec![1; 100], None).await?;
        cache.store_data("k", vec![2; 40], None).await?;

        assert_eq!(cache.size().await, 40, "backend {}", cache.backend_type());
        assert_eq!(cache.retrieve_data("k").await?, Some(vec![2; 40]));
    }
    Ok(())
}

#[tokio::test]
async fn test_expiry_is_observed_on_read() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        cache
            .store_data("short", b"v".to_vec(), Some(Duration::from_millis(40)))
            .await?;
        cache.store_data("long", b"v".to_vec(), None).await?;
    }

    tokio::time::sleep(Duration::from_millis(80)).await;

    for cache in &backends.caches {
        assert_eq!(cache.retrieve_data("short").await?, None, "backend {}", cache.backend_type());
        assert!(!cache.exists("short").await?);
        assert_eq!(cache.all_keys().await?, vec!["long".to_string()]);
        assert_eq!(cache.size().await, 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_set_expiration_on_missing_key() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        let result = cache.set_expiration("ghost", Duration::from_secs(10)).await;
        assert!(
            matches!(result, Err(CacheError::KeyNotFound(ref key)) if key == "ghost"),
            "backend {}",
            cache.backend_type()
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_set_expiration_extends_lifetime() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        cache
            .store_data("k", b"v".to_vec(), Some(Duration::from_millis(40)))
            .await?;
        cache.set_expiration("k", Duration::from_secs(60)).await?;
    }

    tokio::time::sleep(Duration::from_millis(80)).await;

    for cache in &backends.caches {
        assert!(cache.exists("k").await?, "backend {}", cache.backend_type());
    }
    Ok(())
}

#[tokio::test]
async fn test_remove_and_clear_all() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        cache.store_data("a", b"1".to_vec(), None).await?;
        cache.store_data("b", b"22".to_vec(), None).await?;

        cache.remove("a").await?;
        cache.remove("a").await?;
        cache.remove("never-stored").await?;
        assert_eq!(cache.size().await, 2, "backend {}", cache.backend_type());

        cache.clear_all().await?;
        assert_eq!(cache.size().await, 0);
        assert!(cache.all_keys().await?.is_empty());

        cache.store_data("c", b"3".to_vec(), None).await?;
        assert!(cache.exists("c").await?);
    }
    Ok(())
}

#[tokio::test]
async fn test_oversized_payload_rejected_everywhere() -> anyhow::Result<()> {
    let backends = all_backends(100).await?;

    for cache in &backends.caches {
        cache.store_data("small", vec![0; 10], None).await?;

        let result = cache.store_data("huge", vec![0; 101], None).await;
        assert!(
            matches!(result, Err(CacheError::InsufficientSpace { required: 101, capacity: 100 })),
            "backend {}",
            cache.backend_type()
        );
        assert!(cache.exists("small").await?);
    }
    Ok(())
}

#[tokio::test]
async fn test_cleanup_and_statistics() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        for key in ["x", "y"] {
            cache
                .store_data(key, b"v".to_vec(), Some(Duration::from_millis(30)))
                .await?;
        }
        cache.store_data("z", b"v".to_vec(), None).await?;
    }

    tokio::time::sleep(Duration::from_millis(60)).await;

    for cache in &backends.caches {
        assert_eq!(cache.cleanup_expired_entries().await?, 2, "backend {}", cache.backend_type());
        assert_eq!(cache.cleanup_expired_entries().await?, 0);

        cache.retrieve_data("z").await?;
        cache.retrieve_data("missing").await?;

        let stats = cache.statistics().await;
        assert_eq!(stats.expirations, 2);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
    Ok(())
}

#[tokio::test]
async fn test_export_lists_live_entries() -> anyhow::Result<()> {
    let backends = all_backends(10_000).await?;

    for cache in &backends.caches {
        cache.store_data("b", b"bee".to_vec(), None).await?;
        cache.store_data("a", b"ay".to_vec(), None).await?;

        let export = cache.export_all_data().await?;
        assert_eq!(export.backend, cache.backend_type());
        let keys: Vec<&str> = export.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(export.total_size(), 5);

        let payload = export.entries[0].payload()?;
        if cache.backend_type() == "secure" {
            assert_eq!(payload, None);
        } else {
            assert_eq!(payload, Some(b"ay".to_vec()));
        }
    }
    Ok(())
}

// == Backend Scenarios ==

#[tokio::test]
async fn test_memory_content_types() -> anyhow::Result<()> {
    init_tracing();
    let store = MemoryStore::new(test_config(1_000));

    store
        .store_data_as("avatar", vec![0x89, 0x50], None, ContentType::Image)
        .await?;

    let entry = store.peek_entry("avatar").await.expect("entry present");
    assert_eq!(entry.content_type, ContentType::Image);
    assert_eq!(entry.access_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_memory_lfu_keeps_popular_entries() -> anyhow::Result<()> {
    init_tracing();
    let store = MemoryStore::new(test_config(30).with_eviction_policy(EvictionPolicy::Lfu));

    store.store_data("popular", vec![1; 10], None).await?;
    store.store_data("rare", vec![2; 10], None).await?;
    store.store_data("steady", vec![3; 10], None).await?;
    for _ in 0..3 {
        store.retrieve_data("popular").await?;
        store.retrieve_data("steady").await?;
    }

    store.store_data("new", vec![4; 10], None).await?;

    assert!(!store.exists("rare").await?);
    assert!(store.exists("popular").await?);
    assert!(store.exists("steady").await?);
    assert_eq!(store.statistics().await.evictions, 1);
    Ok(())
}

#[tokio::test]
async fn test_disk_store_survives_restart() -> anyhow::Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let profile = Profile {
        name: "grace".to_string(),
        visits: 7,
    };

    {
        let store = DiskStore::open(dir.path(), test_config(10_000)).await?;
        store.store("profile", &profile, None).await?;
        store.store_data("scratch", b"tmp".to_vec(), None).await?;
        store.remove("scratch").await?;
    }

    let store = DiskStore::open(dir.path(), test_config(10_000)).await?;
    let loaded: Option<Profile> = store.retrieve("profile").await?;
    assert_eq!(loaded, Some(profile));
    assert_eq!(store.all_keys().await?, vec!["profile".to_string()]);
    assert!(store.check_health().await?.healthy);
    Ok(())
}

#[tokio::test]
async fn test_disk_store_heals_deleted_payload() -> anyhow::Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let store = DiskStore::open(dir.path(), test_config(10_000)).await?;

    store.store_data("doc", b"contents".to_vec(), None).await?;
    tokio::fs::remove_file(store.payload_path("doc")).await?;

    let report = store.check_health().await?;
    assert!(!report.healthy);
    assert_eq!(report.missing_files, vec!["doc".to_string()]);

    assert_eq!(store.retrieve_data("doc").await?, None);
    assert_eq!(store.size().await, 0);
    assert!(store.check_health().await?.healthy);
    Ok(())
}

#[tokio::test]
async fn test_secure_store_with_file_backends() -> anyhow::Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let secrets_path = dir.path().join("secrets.json");
    let settings_dir = dir.path().join("settings");

    {
        let secrets = Arc::new(FileSecretStore::open(&secrets_path).await?);
        let settings = Arc::new(FileSettingsStore::new(&settings_dir));
        let store = SecureStore::open(test_config(10_000), secrets, settings).await?;
        store.store_data("api-token", b"s3cr3t-value".to_vec(), None).await?;
    }

    let on_disk = tokio::fs::read_to_string(&secrets_path).await?;
    assert!(!on_disk.contains(&hex::encode(b"s3cr3t-value")));

    let secrets = Arc::new(FileSecretStore::open(&secrets_path).await?);
    let raw = secrets.query(DEFAULT_SERVICE, "api-token").await?;
    assert!(raw.is_some());

    let settings = Arc::new(FileSettingsStore::new(&settings_dir));
    let store = SecureStore::open(test_config(10_000), secrets, settings).await?;
    assert_eq!(
        store.retrieve_data("api-token").await?,
        Some(b"s3cr3t-value".to_vec())
    );
    Ok(())
}

#[tokio::test]
async fn test_cleanup_task_sweeps_disk_store() -> anyhow::Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let store = Arc::new(DiskStore::open(dir.path(), test_config(10_000)).await?);

    store
        .store_data("temp", b"v".to_vec(), Some(Duration::from_millis(50)))
        .await?;
    let payload = store.payload_path("temp");
    assert!(payload.exists());

    let handle = spawn_cleanup_task(store.clone(), Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(350)).await;
    handle.abort();

    assert!(!payload.exists());
    assert_eq!(store.statistics().await.expirations, 1);
    Ok(())
}

// == Concurrency ==

const WORKERS: u8 = 8;
const STEPS: u8 = 40;

/// Payload whose length is derived from its fill byte, so a torn write is detectable.
fn tagged_payload(tag: u8) -> Vec<u8> {
    vec![tag; 20 + (tag as usize % 16) * 25]
}

fn assert_payload_intact(bytes: &[u8]) {
    let tag = bytes[0];
    assert_eq!(bytes.len(), 20 + (tag as usize % 16) * 25);
    assert!(bytes.iter().all(|&b| b == tag));
}

/// Interleaves store/remove/retrieve on overlapping keys from many tasks.
async fn run_mixed_workload(cache: Arc<dyn ObjectCache>, max_size: u64) -> anyhow::Result<()> {
    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for step in 0..STEPS {
                let key = format!("k{}", (worker as usize + step as usize) % 6);
                match (worker as usize * 7 + step as usize) % 3 {
                    0 => {
                        let tag = worker.wrapping_mul(31).wrapping_add(step);
                        cache.store_data(&key, tagged_payload(tag), None).await?;
                    }
                    1 => cache.remove(&key).await?,
                    _ => {
                        if let Some(bytes) = cache.retrieve_data(&key).await? {
                            assert_payload_intact(&bytes);
                        }
                    }
                }
                let size = cache.size().await;
                assert!(size <= max_size, "size {size} exceeds {max_size}");
            }
            Ok::<(), CacheError>(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let mut total = 0;
    for key in cache.all_keys().await? {
        let bytes = cache
            .retrieve_data(&key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("listed key {key} has no payload"))?;
        assert_payload_intact(&bytes);
        total += bytes.len() as u64;
    }
    assert_eq!(cache.size().await, total, "backend {}", cache.backend_type());
    assert_eq!(cache.statistics().await.total_bytes, total);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_operations_keep_accounting_consistent() -> anyhow::Result<()> {
    let max_size = 1_000;
    let backends = all_backends(max_size).await?;

    for cache in &backends.caches {
        run_mixed_workload(cache.clone(), max_size).await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disk_operations_keep_index_and_files_aligned() -> anyhow::Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let max_size = 1_000;
    let store = Arc::new(DiskStore::open(dir.path(), test_config(max_size)).await?);

    run_mixed_workload(store.clone(), max_size).await?;

    let report = store.check_health().await?;
    assert!(report.healthy, "issues: {:?}", report.issues);
    assert_eq!(report.orphaned_files, 0);
    assert!(report.missing_files.is_empty());
    Ok(())
}
