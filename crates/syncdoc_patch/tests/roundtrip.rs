//! Property tests for diff/apply convergence.

use proptest::prelude::*;
use serde_json::Value;
use syncdoc_patch::{apply, diff};

// Null is excluded inside containers: the differ deliberately treats a
// null side as absent (add/remove instead of replace), so `{"a": null}`
// and `{}` are not distinguished.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| Value::Number(n.into())),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn apply_diff_converges(old in arb_json(), new in arb_json()) {
        let ops = diff(&old, &new);
        let mut doc = old.clone();
        apply(&mut doc, &ops).unwrap();
        prop_assert_eq!(doc, new);
    }

    #[test]
    fn diff_against_self_is_empty(doc in arb_json()) {
        prop_assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn empty_delta_changes_nothing(doc in arb_json()) {
        let mut copy = doc.clone();
        let records = apply(&mut copy, &[]).unwrap();
        prop_assert!(records.is_empty());
        prop_assert_eq!(copy, doc);
    }
}
