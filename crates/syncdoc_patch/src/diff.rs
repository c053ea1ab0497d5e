//! Structural diff between two documents.

use crate::operation::PatchOp;
use crate::pointer;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Tuning knobs for diff computation.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Sibling-operation count above which the parent is replaced wholesale.
    pub coalesce_threshold: usize,
    /// Estimated value size above which the near-duplicate check applies.
    pub large_value_size: usize,
    /// Similarity score below which a large value is replaced without
    /// deep-diffing.
    pub similarity_threshold: f64,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            coalesce_threshold: 3,
            large_value_size: 1000,
            similarity_threshold: 0.3,
        }
    }
}

/// Computes the operations transforming `old` into `new`.
///
/// Equal documents yield zero operations. Object comparison is
/// order-independent; array comparison is order-sensitive.
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOp> {
    diff_with_options(old, new, &DiffOptions::default())
}

/// Computes a diff with explicit tuning options.
pub fn diff_with_options(old: &Value, new: &Value, options: &DiffOptions) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at(old, new, "", options, &mut ops);
    coalesce(new, ops, options)
}

fn diff_at(old: &Value, new: &Value, path: &str, options: &DiffOptions, ops: &mut Vec<PatchOp>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Null, _) => ops.push(PatchOp::add(path, new.clone())),
        (_, Value::Null) => ops.push(PatchOp::remove(path)),
        (Value::Object(a), Value::Object(b)) => {
            if estimated_size(old) > options.large_value_size
                && key_similarity(a, b) < options.similarity_threshold
            {
                // Effectively rewritten blob; deep-diffing would be wasted work.
                ops.push(PatchOp::replace(path, new.clone()));
                return;
            }
            for key in a.keys() {
                if !b.contains_key(key) {
                    ops.push(PatchOp::remove(pointer::join(path, key)));
                }
            }
            for (key, new_val) in b {
                let child = pointer::join(path, key);
                match a.get(key) {
                    Some(old_val) => diff_at(old_val, new_val, &child, options, ops),
                    None => ops.push(PatchOp::add(child, new_val.clone())),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => diff_arrays(a, b, path, options, ops),
        // Shape mismatch or changed primitive: no partial diff crosses
        // a type boundary.
        _ => ops.push(PatchOp::replace(path, new.clone())),
    }
}

fn diff_arrays(a: &[Value], b: &[Value], path: &str, options: &DiffOptions, ops: &mut Vec<PatchOp>) {
    let max_common = a.len().min(b.len());
    let mut prefix = 0;
    while prefix < max_common && a[prefix] == b[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < max_common - prefix && a[a.len() - 1 - suffix] == b[b.len() - 1 - suffix] {
        suffix += 1;
    }

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    // Pure growth or shrink: identical content except for a run missing
    // on one side. One whole-array replace beats a cascade of index ops.
    if (a_mid.is_empty() || b_mid.is_empty()) && a.len() != b.len() {
        ops.push(PatchOp::replace(path, Value::Array(b.to_vec())));
        return;
    }

    if a.iter().map(estimated_size).sum::<usize>() > options.large_value_size {
        let shared = (prefix + suffix) as f64 / a.len().max(b.len()) as f64;
        if shared < options.similarity_threshold {
            ops.push(PatchOp::replace(path, Value::Array(b.to_vec())));
            return;
        }
    }

    let overlap = a_mid.len().min(b_mid.len());
    for i in 0..overlap {
        let child = pointer::join(path, &(prefix + i).to_string());
        diff_at(&a_mid[i], &b_mid[i], &child, options, ops);
    }
    for (i, extra) in b_mid.iter().enumerate().skip(overlap) {
        ops.push(PatchOp::add(
            pointer::join(path, &(prefix + i).to_string()),
            extra.clone(),
        ));
    }
    // Removals in decreasing index order so earlier ones do not shift
    // the indices of later ones during apply.
    for i in (overlap..a_mid.len()).rev() {
        ops.push(PatchOp::remove(pointer::join(path, &(prefix + i).to_string())));
    }
}

/// Collapses wide sibling fan-out into a single parent replace.
///
/// When more than `coalesce_threshold` operations share a parent and no
/// operation targets the parent itself, one replace of the parent's new
/// value stands in for all of them.
fn coalesce(new: &Value, ops: Vec<PatchOp>, options: &DiffOptions) -> Vec<PatchOp> {
    if ops.len() <= options.coalesce_threshold {
        return ops;
    }

    let targeted: HashSet<&str> = ops.iter().map(|op| op.path()).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for op in &ops {
        if let Some(parent) = pointer::parent_of(op.path()) {
            *counts.entry(parent).or_insert(0) += 1;
        }
    }

    let mut collapse: Vec<String> = counts
        .into_iter()
        .filter(|(parent, count)| *count > options.coalesce_threshold && !targeted.contains(parent))
        .filter(|(parent, _)| matches!(pointer::get(new, parent), Ok(Some(_))))
        .map(|(parent, _)| parent.to_string())
        .collect();

    if collapse.is_empty() {
        return ops;
    }
    tracing::trace!(parents = collapse.len(), "coalescing sibling fan-out");

    // Nested collapse targets reduce to the outermost; its replace
    // already carries the whole subtree.
    collapse.sort();
    let mut outer: Vec<String> = Vec::new();
    for parent in collapse {
        if !outer.iter().any(|o| is_covered(&parent, o)) {
            outer.push(parent);
        }
    }

    let mut out = Vec::with_capacity(ops.len());
    let mut emitted: HashSet<String> = HashSet::new();
    for op in ops {
        match outer.iter().find(|parent| is_covered(op.path(), parent)) {
            Some(parent) => {
                if emitted.insert(parent.clone()) {
                    if let Ok(Some(value)) = pointer::get(new, parent) {
                        let value = value.clone();
                        out.push(PatchOp::replace(parent.clone(), value));
                    }
                }
            }
            None => out.push(op),
        }
    }
    out
}

/// Returns true if `path` equals `parent` or lies underneath it.
fn is_covered(path: &str, parent: &str) -> bool {
    if pointer::is_root(parent) {
        return true;
    }
    path == parent || path.starts_with(parent) && path[parent.len()..].starts_with('/')
}

fn key_similarity(a: &serde_json::Map<String, Value>, b: &serde_json::Map<String, Value>) -> f64 {
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 1.0;
    }
    let shared = a.keys().filter(|k| b.contains_key(*k)).count();
    shared as f64 / larger as f64
}

fn estimated_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => 1,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(estimated_size).sum::<usize>() + items.len(),
        Value::Object(map) => map.iter().map(|(k, v)| k.len() + estimated_size(v)).sum(),
    }
}
