//! Point-in-time document snapshots.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An immutable point-in-time copy of a document with an integrity
/// checksum.
///
/// The checksum covers `{version, timestamp, data}`; a snapshot whose
/// checksum no longer matches a recomputation is corrupt and rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot id.
    pub id: String,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Document version at capture time.
    pub version: u64,
    /// Deep copy of the document data.
    pub data: Value,
    /// Integrity checksum.
    pub checksum: String,
    /// Device that took the snapshot.
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Session the snapshot belongs to.
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

impl Snapshot {
    /// Captures a snapshot of document data, computing its checksum.
    pub fn capture(
        version: u64,
        data: Value,
        device_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let timestamp = Utc::now();
        let checksum = syncdoc_patch::checksum(version, &timestamp, &data);
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            version,
            data,
            checksum,
            device_id: device_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Returns true if the stored checksum matches a recomputation.
    pub fn is_valid(&self) -> bool {
        syncdoc_patch::checksum(self.version, &self.timestamp, &self.data) == self.checksum
    }

    /// Verifies integrity, rejecting a corrupt snapshot.
    pub fn verify(&self) -> ProtocolResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ProtocolError::SnapshotIntegrity {
                id: self.id.clone(),
            })
        }
    }
}
