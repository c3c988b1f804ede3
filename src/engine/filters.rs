//! Filter-tree flattening.
//!
//! A step's action parameters may embed a `filter` tree: leaves are
//! single-key objects like `{"eq": {"field": "0001", "value": "lorem"}}`,
//! combined with `and`/`or` nodes whose value is a list of subtrees. The
//! recipe panel only renders a flat list of leaves, so the tree is flattened
//! at step-build time.

use serde_json::Value;

/// One filter leaf extracted from a step's filter tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterLeaf {
    /// Leaf operator, e.g. `eq`, `contains`, `range`, `invalid`.
    pub kind: String,
    pub field: Option<String>,
    pub value: Option<Value>,
}

/// Flatten a filter tree into its leaves, in depth-first order.
///
/// Unrecognized shapes are skipped rather than failing the step build: the
/// filter list is display-only and a malformed node must not block a refresh.
pub fn flatten_filter_tree(filter: &Value) -> Vec<FilterLeaf> {
    let mut leaves = Vec::new();
    collect(filter, &mut leaves);
    leaves
}

fn collect(node: &Value, leaves: &mut Vec<FilterLeaf>) {
    let Some(object) = node.as_object() else {
        return;
    };

    for (key, body) in object {
        if key == "and" || key == "or" {
            match body {
                Value::Array(children) => {
                    for child in children {
                        collect(child, leaves);
                    }
                }
                // Some backends serialize binary combinators as an object
                // with two subtrees instead of an array.
                Value::Object(_) => collect(body, leaves),
                _ => {}
            }
        } else {
            leaves.push(FilterLeaf {
                kind: key.clone(),
                field: body.get("field").and_then(Value::as_str).map(String::from),
                value: body.get("value").cloned(),
            });
        }
    }
}
