//! Patch operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single patch operation against a document path.
///
/// Operations are immutable once constructed. The `path` (and `from`,
/// for `Move`/`Copy`) use slash-delimited addressing with `~0`/`~1`
/// escaping, see [`crate::pointer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert a value at a path that does not yet exist.
    Add {
        /// Target path.
        path: String,
        /// The value to insert.
        value: Value,
    },
    /// Remove the value at a path.
    Remove {
        /// Target path.
        path: String,
    },
    /// Replace the value at a path.
    Replace {
        /// Target path.
        path: String,
        /// The new value.
        value: Value,
    },
    /// Move the value at `from` to `path`.
    Move {
        /// Destination path.
        path: String,
        /// Source path.
        from: String,
    },
    /// Copy the value at `from` to `path`.
    Copy {
        /// Destination path.
        path: String,
        /// Source path.
        from: String,
    },
    /// Assert the value at a path equals an expected value.
    Test {
        /// Target path.
        path: String,
        /// The expected value.
        value: Value,
    },
}

impl PatchOp {
    /// Creates an `add` operation.
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Add {
            path: path.into(),
            value,
        }
    }

    /// Creates a `remove` operation.
    pub fn remove(path: impl Into<String>) -> Self {
        PatchOp::Remove { path: path.into() }
    }

    /// Creates a `replace` operation.
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Replace {
            path: path.into(),
            value,
        }
    }

    /// Creates a `move` operation.
    pub fn mov(path: impl Into<String>, from: impl Into<String>) -> Self {
        PatchOp::Move {
            path: path.into(),
            from: from.into(),
        }
    }

    /// Creates a `copy` operation.
    pub fn copy(path: impl Into<String>, from: impl Into<String>) -> Self {
        PatchOp::Copy {
            path: path.into(),
            from: from.into(),
        }
    }

    /// Creates a `test` operation.
    pub fn test(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Test {
            path: path.into(),
            value,
        }
    }

    /// Returns the target path of the operation.
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Replace { path, .. }
            | PatchOp::Move { path, .. }
            | PatchOp::Copy { path, .. }
            | PatchOp::Test { path, .. } => path,
        }
    }

    /// Returns the carried value, if the operation has one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            PatchOp::Add { value, .. }
            | PatchOp::Replace { value, .. }
            | PatchOp::Test { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Returns true if applying the operation can mutate the document.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, PatchOp::Test { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_and_accessors() {
        let op = PatchOp::add("/a", json!(1));
        assert_eq!(op.path(), "/a");
        assert_eq!(op.value(), Some(&json!(1)));
        assert!(op.is_mutating());

        let op = PatchOp::test("/a", json!(1));
        assert!(!op.is_mutating());

        let op = PatchOp::remove("/a");
        assert_eq!(op.value(), None);
    }

    #[test]
    fn serde_repr_uses_op_tag() {
        let op = PatchOp::replace("/items", json!([1, 2, 3]));
        let encoded = serde_json::to_value(&op).unwrap();
        assert_eq!(
            encoded,
            json!({"op": "replace", "path": "/items", "value": [1, 2, 3]})
        );

        let decoded: PatchOp =
            serde_json::from_value(json!({"op": "move", "path": "/b", "from": "/a"})).unwrap();
        assert_eq!(decoded, PatchOp::mov("/b", "/a"));
    }
}
