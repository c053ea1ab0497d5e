//! Patch application with change-record emission.

use crate::error::{PatchError, PatchResult};
use crate::operation::PatchOp;
use crate::pointer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The externally observable unit of mutation.
///
/// One record is emitted per effective mutation, in path-encounter
/// order. No-op operations emit none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Path the mutation happened at.
    pub path: String,
    /// Value previously at the path, if any.
    pub previous_value: Option<Value>,
    /// Value now at the path, if any.
    pub new_value: Option<Value>,
    /// When the mutation was applied.
    pub timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    /// Creates a change record stamped with the current time.
    pub fn new(path: impl Into<String>, previous: Option<Value>, new: Option<Value>) -> Self {
        Self {
            path: path.into(),
            previous_value: previous,
            new_value: new,
            timestamp: Utc::now(),
        }
    }
}

/// Applies operations in order against a mutable document.
///
/// Returns the change records for every effective mutation. A failed
/// `test` aborts before any further operation is applied; `move` and
/// `copy` read their `from` path before mutating the destination.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> PatchResult<Vec<ChangeRecord>> {
    let mut records = Vec::new();
    for op in ops {
        apply_one(doc, op, &mut records)?;
    }
    Ok(records)
}

fn apply_one(doc: &mut Value, op: &PatchOp, records: &mut Vec<ChangeRecord>) -> PatchResult<()> {
    match op {
        PatchOp::Test { path, value } => {
            let actual = pointer::get(doc, path)?.cloned().unwrap_or(Value::Null);
            if &actual != value {
                return Err(PatchError::TestFailed {
                    path: path.clone(),
                    expected: value.clone(),
                    actual,
                });
            }
            Ok(())
        }
        PatchOp::Add { path, value } => add_value(doc, path, value.clone(), records),
        PatchOp::Remove { path } => remove_value(doc, path, records),
        PatchOp::Replace { path, value } => replace_value(doc, path, value.clone(), records),
        PatchOp::Move { path, from } => {
            let moved = pointer::get(doc, from)?
                .cloned()
                .ok_or_else(|| PatchError::PathNotFound(from.clone()))?;
            pointer::remove_path(doc, from)?;
            add_value(doc, path, moved, records)
        }
        PatchOp::Copy { path, from } => {
            let copied = pointer::get(doc, from)?
                .cloned()
                .ok_or_else(|| PatchError::PathNotFound(from.clone()))?;
            add_value(doc, path, copied, records)
        }
    }
}

fn add_value(
    doc: &mut Value,
    path: &str,
    value: Value,
    records: &mut Vec<ChangeRecord>,
) -> PatchResult<()> {
    if pointer::is_root(path) {
        if *doc == value {
            return Ok(());
        }
        let previous = std::mem::replace(doc, value.clone());
        records.push(ChangeRecord::new(path, Some(previous), Some(value)));
        return Ok(());
    }

    let (parent, last) = pointer::resolve_parent_mut(doc, path)?;
    match parent {
        Value::Object(map) => {
            if map.get(&last) == Some(&value) {
                return Ok(());
            }
            let previous = map.insert(last, value.clone());
            records.push(ChangeRecord::new(path, previous, Some(value)));
            Ok(())
        }
        Value::Array(arr) => {
            let len = arr.len();
            let idx = pointer::parse_index(&last, len, path)?;
            if idx > len {
                return Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: idx,
                    len,
                });
            }
            arr.insert(idx, value.clone());
            records.push(ChangeRecord::new(path, None, Some(value)));
            Ok(())
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

fn replace_value(
    doc: &mut Value,
    path: &str,
    value: Value,
    records: &mut Vec<ChangeRecord>,
) -> PatchResult<()> {
    if pointer::is_root(path) {
        if *doc == value {
            return Ok(());
        }
        let previous = std::mem::replace(doc, value.clone());
        records.push(ChangeRecord::new(path, Some(previous), Some(value)));
        return Ok(());
    }

    let existing = pointer::get(doc, path)?
        .cloned()
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?;
    if existing == value {
        return Ok(());
    }

    let (parent, last) = pointer::resolve_parent_mut(doc, path)?;
    match parent {
        Value::Object(map) => {
            map.insert(last, value.clone());
        }
        Value::Array(arr) => {
            let len = arr.len();
            let idx = pointer::parse_index(&last, len, path)?;
            if idx >= len {
                return Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: idx,
                    len,
                });
            }
            arr[idx] = value.clone();
        }
        _ => return Err(PatchError::PathNotFound(path.to_string())),
    }
    records.push(ChangeRecord::new(path, Some(existing), Some(value)));
    Ok(())
}

fn remove_value(doc: &mut Value, path: &str, records: &mut Vec<ChangeRecord>) -> PatchResult<()> {
    if pointer::is_root(path) {
        if *doc == Value::Null {
            return Ok(());
        }
        let previous = std::mem::replace(doc, Value::Null);
        records.push(ChangeRecord::new(path, Some(previous), None));
        return Ok(());
    }

    let removed = pointer::remove_path(doc, path)?
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?;
    records.push(ChangeRecord::new(path, Some(removed), None));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_delta_is_noop() {
        let mut doc = json!({"a": 1});
        let records = apply(&mut doc, &[]).unwrap();
        assert!(records.is_empty());
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn add_and_remove_emit_records() {
        let mut doc = json!({"a": 1});
        let records = apply(
            &mut doc,
            &[PatchOp::add("/b", json!(2)), PatchOp::remove("/a")],
        )
        .unwrap();
        assert_eq!(doc, json!({"b": 2}));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, "/b");
        assert_eq!(records[0].previous_value, None);
        assert_eq!(records[1].previous_value, Some(json!(1)));
        assert_eq!(records[1].new_value, None);
    }

    #[test]
    fn noop_replace_emits_nothing() {
        let mut doc = json!({"a": 1});
        let records = apply(&mut doc, &[PatchOp::replace("/a", json!(1))]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn noop_add_emits_nothing() {
        let mut doc = json!({"a": 1});
        let records = apply(&mut doc, &[PatchOp::add("/a", json!(1))]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_failure_aborts_without_mutation() {
        let mut doc = json!({"value": "actual"});
        let err = apply(
            &mut doc,
            &[
                PatchOp::test("/value", json!("expected")),
                PatchOp::replace("/value", json!("new")),
            ],
        )
        .unwrap_err();
        assert!(err.is_test_failure());
        assert_eq!(doc, json!({"value": "actual"}));
    }

    #[test]
    fn test_success_emits_no_record() {
        let mut doc = json!({"value": "v"});
        let records = apply(&mut doc, &[PatchOp::test("/value", json!("v"))]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn move_reads_from_before_mutating() {
        let mut doc = json!({"a": {"x": 1}, "b": {}});
        let records = apply(&mut doc, &[PatchOp::mov("/b/x", "/a/x")]).unwrap();
        assert_eq!(doc, json!({"a": {}, "b": {"x": 1}}));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "/b/x");
    }

    #[test]
    fn copy_leaves_source() {
        let mut doc = json!({"a": 1});
        apply(&mut doc, &[PatchOp::copy("/b", "/a")]).unwrap();
        assert_eq!(doc, json!({"a": 1, "b": 1}));
    }

    #[test]
    fn root_replace_swaps_whole_document() {
        let mut doc = json!({"a": 1});
        let records = apply(&mut doc, &[PatchOp::replace("", json!({"b": 2}))]).unwrap();
        assert_eq!(doc, json!({"b": 2}));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].previous_value, Some(json!({"a": 1})));
    }

    #[test]
    fn root_remove_clears_document() {
        let mut doc = json!({"a": 1});
        apply(&mut doc, &[PatchOp::remove("")]).unwrap();
        assert_eq!(doc, Value::Null);
    }

    #[test]
    fn array_insert_shifts_elements() {
        let mut doc = json!({"items": [1, 3]});
        apply(&mut doc, &[PatchOp::add("/items/1", json!(2))]).unwrap();
        assert_eq!(doc, json!({"items": [1, 2, 3]}));
    }

    #[test]
    fn missing_path_errors() {
        let mut doc = json!({});
        assert!(apply(&mut doc, &[PatchOp::replace("/missing", json!(1))]).is_err());
        assert!(apply(&mut doc, &[PatchOp::remove("/missing")]).is_err());
    }
}
