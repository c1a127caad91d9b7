//! Secrets Module
//!
//! Boundary collaborators of the secure store: a keychain-like secret store and
//! a durable settings store for its metadata table.

mod keychain;
mod settings;

pub use keychain::{FileSecretStore, InMemorySecretStore, SecretStore, SecretStoreError};
pub use settings::{FileSettingsStore, InMemorySettingsStore, SettingsStore};
