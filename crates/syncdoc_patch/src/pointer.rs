//! Slash-delimited path addressing into JSON documents.
//!
//! Paths use `/` as the segment separator with `~1` escaping `/` and
//! `~0` escaping `~` inside keys. The empty string and a bare `/` both
//! address the document root.

use crate::error::{PatchError, PatchResult};
use serde_json::Value;

/// Escapes a single key for use as a path segment.
pub fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Unescapes a single path segment back into a key.
pub fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Parses a path into unescaped segments. The root parses to no segments.
pub fn parse(path: &str) -> PatchResult<Vec<String>> {
    if path.is_empty() || path == "/" {
        return Ok(Vec::new());
    }
    if !path.starts_with('/') {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    Ok(path[1..].split('/').map(unescape).collect())
}

/// Returns true if the path addresses the document root.
pub fn is_root(path: &str) -> bool {
    path.is_empty() || path == "/"
}

/// Joins a parent path and a raw key into a child path.
pub fn join(parent: &str, key: &str) -> String {
    if is_root(parent) {
        format!("/{}", escape(key))
    } else {
        format!("{}/{}", parent, escape(key))
    }
}

/// Returns the parent path of a non-root path, or `None` for the root.
pub fn parent_of(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    path.rfind('/').map(|i| &path[..i])
}

/// Resolves a path to a reference, or `None` if it does not exist.
pub fn get<'a>(doc: &'a Value, path: &str) -> PatchResult<Option<&'a Value>> {
    let segments = parse(path)?;
    let mut current = doc;
    for segment in &segments {
        match current {
            Value::Object(map) => match map.get(segment.as_str()) {
                Some(v) => current = v,
                None => return Ok(None),
            },
            Value::Array(arr) => match segment.parse::<usize>().ok().and_then(|i| arr.get(i)) {
                Some(v) => current = v,
                None => return Ok(None),
            },
            _ => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Parses an array segment into an index, allowing `-` as "one past the end".
pub fn parse_index(segment: &str, len: usize, path: &str) -> PatchResult<usize> {
    if segment == "-" {
        return Ok(len);
    }
    segment
        .parse::<usize>()
        .map_err(|_| PatchError::InvalidIndex {
            path: path.to_string(),
            index: segment.to_string(),
        })
}

/// Resolves the container holding the last segment of a path.
///
/// Returns the parent value and the final (unescaped) segment. Errors if
/// any intermediate segment is missing or a non-container is traversed.
pub fn resolve_parent_mut<'a>(
    doc: &'a mut Value,
    path: &str,
) -> PatchResult<(&'a mut Value, String)> {
    let mut segments = parse(path)?;
    let last = segments
        .pop()
        .ok_or_else(|| PatchError::InvalidPointer(path.to_string()))?;

    let mut current = doc;
    for segment in &segments {
        current = match current {
            Value::Object(map) => map
                .get_mut(segment.as_str())
                .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?,
            Value::Array(arr) => {
                let len = arr.len();
                let idx = parse_index(segment, len, path)?;
                arr.get_mut(idx)
                    .ok_or_else(|| PatchError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: idx,
                        len,
                    })?
            }
            _ => return Err(PatchError::PathNotFound(path.to_string())),
        };
    }
    Ok((current, last))
}

/// Sets a value at a path, creating missing intermediate objects.
///
/// Returns the previous value at the path, if any. Array segments must
/// resolve to an existing index or to `len` (append). A root path
/// replaces the whole document.
pub fn set_creating(doc: &mut Value, path: &str, value: Value) -> PatchResult<Option<Value>> {
    if is_root(path) {
        let previous = std::mem::replace(doc, value);
        return Ok(Some(previous));
    }

    let mut segments = parse(path)?;
    let last = segments
        .pop()
        .ok_or_else(|| PatchError::InvalidPointer(path.to_string()))?;

    let mut current = doc;
    for segment in &segments {
        current = match current {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new())),
            Value::Array(arr) => {
                let len = arr.len();
                let idx = parse_index(segment, len, path)?;
                arr.get_mut(idx)
                    .ok_or_else(|| PatchError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: idx,
                        len,
                    })?
            }
            _ => return Err(PatchError::PathNotFound(path.to_string())),
        };
    }

    match current {
        Value::Object(map) => Ok(map.insert(last, value)),
        Value::Array(arr) => {
            let len = arr.len();
            let idx = parse_index(&last, len, path)?;
            if idx == len {
                arr.push(value);
                Ok(None)
            } else if idx < len {
                Ok(Some(std::mem::replace(&mut arr[idx], value)))
            } else {
                Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: idx,
                    len,
                })
            }
        }
        other => {
            // Overwrite a primitive with an object to make room for the key.
            let mut map = serde_json::Map::new();
            map.insert(last, value);
            *other = Value::Object(map);
            Ok(None)
        }
    }
}

/// Removes the value at a path, returning it if it existed.
///
/// A root path clears the document to `null` and returns the old value.
pub fn remove_path(doc: &mut Value, path: &str) -> PatchResult<Option<Value>> {
    if is_root(path) {
        let previous = std::mem::replace(doc, Value::Null);
        return Ok(Some(previous));
    }

    let (parent, last) = match resolve_parent_mut(doc, path) {
        Ok(pair) => pair,
        Err(PatchError::PathNotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    match parent {
        Value::Object(map) => Ok(map.remove(&last)),
        Value::Array(arr) => {
            let len = arr.len();
            let idx = parse_index(&last, len, path)?;
            if idx < len {
                Ok(Some(arr.remove(idx)))
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}
