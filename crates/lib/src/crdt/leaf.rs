//! Leaf node: an opaque, immutable JSON value inside a list or dictionary.

use serde_json::Value;

/// Leaves have no children and no operations of their own; replacing a leaf
/// means creating a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    data: Value,
}

impl LeafNode {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}
