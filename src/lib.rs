//! Object Cache - multi-backend caching for opaque byte payloads
//!
//! Memory, disk and encrypted secure-store backends share one async contract
//! with TTL expiration and LRU/LFU/FIFO/TTL eviction.

pub mod cache;
pub mod config;
pub mod error;
pub mod secrets;
pub mod tasks;

pub use cache::{
    DiskStore, EvictionPolicy, MemoryStore, ObjectCache, ObjectCacheExt, SecureStore,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
