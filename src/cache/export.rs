//! Export Module
//!
//! Point-in-time dump of a store's contents, serializable to JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// One exported entry. `payload_hex` is None when the backend withholds payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEntry {
    pub key: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub encrypted: bool,
    pub payload_hex: Option<String>,
}

impl ExportedEntry {
    /// Decodes the exported payload, if one was included.
    pub fn payload(&self) -> Result<Option<Vec<u8>>> {
        self.payload_hex
            .as_deref()
            .map(|encoded| {
                hex::decode(encoded)
                    .map_err(|e| CacheError::CorruptedData(format!("{}: {e}", self.key)))
            })
            .transpose()
    }
}

/// Full export of one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheExport {
    pub backend: String,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<ExportedEntry>,
}

impl CacheExport {
    /// Builds an export with entries ordered by key.
    pub fn new(backend: &str, mut entries: Vec<ExportedEntry>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            backend: backend.to_string(),
            exported_at: Utc::now(),
            entries,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CacheError::storage("serialize export", e))
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|entry| entry.size).sum()
    }
}
