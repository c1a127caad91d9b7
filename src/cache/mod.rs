//! Cache Module
//!
//! Object caching behind one contract with three backends: process memory,
//! a filesystem directory, and an encrypted secret store.

mod contract;
mod crypto;
mod disk;
mod disk_index;
mod entry;
mod eviction;
mod export;
mod memory;
mod secure;
mod stats;


// Re-export public types
pub use contract::{ObjectCache, ObjectCacheExt};
pub use crypto::EncryptionKey;
pub use disk::{DiskStore, HealthReport, EVICTION_TARGET_RATIO};
pub use disk_index::DiskCacheEntry;
pub use entry::{CacheEntry, ContentType};
pub use eviction::{EntrySnapshot, EvictionPlan, EvictionPolicy};
pub use export::{CacheExport, ExportedEntry};
pub use memory::MemoryStore;
pub use secure::{SecureCacheMetadata, SecureStore, DEFAULT_SERVICE, ENCRYPTION_KEY_TAG};
pub use stats::CacheStats;
