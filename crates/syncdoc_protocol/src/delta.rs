//! Version-to-version deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use syncdoc_patch::PatchOp;

/// The exact transition from one document version to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Version the operations apply against.
    #[serde(rename = "baseVersion")]
    pub base_version: u64,
    /// Version the document reaches after application.
    #[serde(rename = "targetVersion")]
    pub target_version: u64,
    /// Ordered patch operations.
    pub operations: Vec<PatchOp>,
    /// When the delta was produced.
    pub timestamp: DateTime<Utc>,
    /// Whether the operations were compressed on the wire.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
}

impl Delta {
    /// Creates a delta for a version transition.
    pub fn new(base_version: u64, target_version: u64, operations: Vec<PatchOp>) -> Self {
        Self {
            base_version,
            target_version,
            operations,
            timestamp: Utc::now(),
            compressed: false,
        }
    }

    /// Returns true if the delta carries no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delta_roundtrip() {
        let delta = Delta::new(3, 4, vec![PatchOp::replace("/a", json!(1))]);
        let encoded = serde_json::to_string(&delta).unwrap();
        let decoded: Delta = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, delta);
        assert!(!decoded.compressed);
    }

    #[test]
    fn field_names_are_camel_case() {
        let delta = Delta::new(1, 2, vec![]);
        let value = serde_json::to_value(&delta).unwrap();
        assert!(value.get("baseVersion").is_some());
        assert!(value.get("targetVersion").is_some());
    }

    #[test]
    fn empty_delta() {
        let delta = Delta::new(1, 2, vec![]);
        assert!(delta.is_empty());
        assert_eq!(delta.len(), 0);
    }
}
