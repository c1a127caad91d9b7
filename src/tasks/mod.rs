//! Background Tasks Module
//!
//! Periodic maintenance that runs alongside a cache.

mod cleanup;

pub use cleanup::spawn_cleanup_task;
