//! Order-independent content fingerprinting.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex characters kept from the full digest.
const FINGERPRINT_LEN: usize = 16;

/// Computes a short, order-independent content hash of a document.
///
/// Object keys are visited in sorted order so two documents that differ
/// only in key insertion order hash identically. Arrays hash in order.
pub fn fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hash_value(value, &mut hasher);
    truncate_hex(hasher)
}

/// Computes a snapshot checksum over `{version, timestamp, data}`.
pub fn checksum(version: u64, timestamp: &DateTime<Utc>, data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.to_le_bytes());
    hasher.update(timestamp.to_rfc3339().as_bytes());
    hash_value(data, &mut hasher);
    truncate_hex(hasher)
}

fn truncate_hex(hasher: Sha256) -> String {
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

fn hash_value(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => {
            hasher.update(b"b");
            hasher.update([u8::from(*b)]);
        }
        Value::Number(n) => {
            hasher.update(b"#");
            hasher.update(n.to_string().as_bytes());
        }
        Value::String(s) => {
            hasher.update(b"s");
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Object(map) => {
            hasher.update(b"{");
            hasher.update((map.len() as u64).to_le_bytes());
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            for (key, val) in entries {
                hasher.update((key.len() as u64).to_le_bytes());
                hasher.update(key.as_bytes());
                hash_value(val, hasher);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_documents_hash_equal() {
        let a = json!({"x": 1, "y": [1, 2]});
        let b = json!({"x": 1, "y": [1, 2]});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_documents_hash_differently() {
        assert_ne!(fingerprint(&json!({"x": 1})), fingerprint(&json!({"x": 2})));
        assert_ne!(fingerprint(&json!([1, 2])), fingerprint(&json!([2, 1])));
    }

    #[test]
    fn fingerprint_is_short() {
        assert_eq!(fingerprint(&json!(null)).len(), 16);
    }

    #[test]
    fn string_and_number_do_not_collide() {
        assert_ne!(fingerprint(&json!("1")), fingerprint(&json!(1)));
    }

    #[test]
    fn checksum_depends_on_version_and_timestamp() {
        let data = json!({"a": 1});
        let now = Utc::now();
        let c1 = checksum(1, &now, &data);
        let c2 = checksum(2, &now, &data);
        assert_ne!(c1, c2);
        assert_eq!(c1, checksum(1, &now, &data));
    }
}
