//! The logical application document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Synchronization state of the local document, for UI consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// All local edits have been acknowledged.
    Synced,
    /// Local edits await an outgoing sync.
    Pending,
    /// A remote edit conflicted with a local one.
    Conflict,
    /// The last sync attempt failed.
    Error,
}

/// Metadata tracked alongside the document data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// When the document was last mutated.
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
    /// Device id of the last mutator.
    #[serde(rename = "modifiedBy")]
    pub modified_by: String,
    /// Current synchronization status.
    #[serde(rename = "syncStatus")]
    pub sync_status: SyncStatus,
}

/// A tree-shaped document with a monotonically increasing version.
///
/// Owned exclusively by the document manager; mutated only through
/// path-addressed set/delete/batch operations. `version` never
/// decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The document tree.
    pub data: Value,
    /// Monotonically increasing version counter.
    pub version: u64,
    /// When this version was produced.
    pub timestamp: DateTime<Utc>,
    /// Mutation metadata.
    pub metadata: DocumentMeta,
}

impl Document {
    /// Creates an empty document at version 0.
    pub fn new(device_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            data: Value::Object(serde_json::Map::new()),
            version: 0,
            timestamp: now,
            metadata: DocumentMeta {
                last_modified: now,
                modified_by: device_id.into(),
                sync_status: SyncStatus::Synced,
            },
        }
    }

    /// Creates a document from existing data at a given version.
    pub fn from_data(data: Value, version: u64, device_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            data,
            version,
            timestamp: now,
            metadata: DocumentMeta {
                last_modified: now,
                modified_by: device_id.into(),
                sync_status: SyncStatus::Synced,
            },
        }
    }

    /// Records an effective mutation: bumps the version once and marks
    /// the document pending.
    pub fn record_mutation(&mut self, device_id: &str) {
        let now = Utc::now();
        self.version += 1;
        self.timestamp = now;
        self.metadata.last_modified = now;
        self.metadata.modified_by = device_id.to_string();
        self.metadata.sync_status = SyncStatus::Pending;
    }

    /// Returns the content fingerprint of the document data.
    pub fn fingerprint(&self) -> String {
        syncdoc_patch::fingerprint(&self.data)
    }
}
