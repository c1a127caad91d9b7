//! Encryption Module
//!
//! AES-256-GCM sealing for secure-store payloads and lifecycle of the single
//! symmetric key kept in the secret store.
//!
//! Sealed layout: `nonce(12) || ciphertext || tag(16)`.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use tracing::{info, warn};

use crate::error::{CacheError, Result};
use crate::secrets::SecretStore;

/// Key length in bytes (256 bits)
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

// == Encryption Key ==
/// Owned handle to the symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([redacted])")
    }
}

impl EncryptionKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key.as_slice());
        Self { bytes }
    }

    /// Wraps existing key material; None unless exactly [`KEY_LEN`] bytes.
    pub fn from_slice(material: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_LEN] = material.try_into().ok()?;
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.bytes)
            .map_err(|e| CacheError::storage("initialize cipher", e))
    }

    // == Seal ==
    /// Encrypts and authenticates `plaintext` under a random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CacheError::storage("encrypt payload", e))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    // == Open ==
    /// Verifies and decrypts a payload produced by [`EncryptionKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CacheError::CorruptedData(format!(
                "sealed payload too short: {} bytes",
                sealed.len()
            )));
        }

        let cipher = self
            .cipher()
            .map_err(|e| CacheError::CorruptedData(e.to_string()))?;
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                CacheError::CorruptedData("decryption failed (wrong key or tampered data)".into())
            })
    }
}

// == Key Lifecycle ==
/// Loads the key stored under `tag`, without creating one.
///
/// Material of the wrong length is reported as absent.
pub async fn load_key(secrets: &dyn SecretStore, tag: &str) -> Result<Option<EncryptionKey>> {
    let material = secrets
        .load_key(tag)
        .await
        .map_err(|e| CacheError::retrieval("load encryption key", e))?;

    Ok(material.and_then(|bytes| {
        let key = EncryptionKey::from_slice(&bytes);
        if key.is_none() {
            warn!(tag, length = bytes.len(), "stored encryption key has wrong length");
        }
        key
    }))
}

/// Loads the key stored under `tag`, generating and persisting one if absent
/// or corrupt.
pub async fn load_or_create_key(secrets: &dyn SecretStore, tag: &str) -> Result<EncryptionKey> {
    if let Some(key) = load_key(secrets, tag).await? {
        return Ok(key);
    }
    create_key(secrets, tag).await
}

/// Generates a key and writes it to the slot for `tag`, replacing any prior key.
pub async fn create_key(secrets: &dyn SecretStore, tag: &str) -> Result<EncryptionKey> {
    let key = EncryptionKey::generate();
    secrets
        .save_key(tag, key.as_bytes())
        .await
        .map_err(|e| CacheError::storage("save encryption key", e))?;
    info!(tag, "generated new encryption key");
    Ok(key)
}
