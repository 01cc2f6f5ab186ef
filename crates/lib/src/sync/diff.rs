//! Reconciliation between the local tree and a fresh storage snapshot.
//!
//! After a reconnect the server sends the whole storage again. Rather than
//! rebuilding the document, the difference between the two id→node tables is
//! expressed as ordinary operations and applied as one remote batch, so
//! subscribers receive precise deltas and unacknowledged local work can be
//! replayed on top.

use indexmap::IndexMap;
use serde_json::Map;

use crate::crdt::{NodeId, Op, SerializedNode};

/// Operations that turn `current` into `fresh`.
///
/// Ordering: node deletions, then per-node key deletions, data updates and
/// repositions, then creations with parents before children.
pub(crate) fn tree_diff(
    current: &IndexMap<NodeId, SerializedNode>,
    fresh: &IndexMap<NodeId, SerializedNode>,
) -> Vec<Op> {
    let mut deletes = Vec::new();
    let mut changes = Vec::new();
    let mut created = Vec::new();

    for (id, node) in current {
        match fresh.get(id) {
            Some(other) if same_identity(node, other) => {}
            _ => deletes.push(Op::delete_node(id.clone())),
        }
    }

    for (id, node) in fresh {
        let Some(previous) = current.get(id) else {
            created.push(id);
            continue;
        };
        if !same_identity(previous, node) {
            created.push(id);
            continue;
        }
        if let (
            SerializedNode::Record { data: old, .. },
            SerializedNode::Record { data: new, .. },
        ) = (previous, node)
        {
            record_changes(id, old, new, &mut changes);
        }
        if previous.parent_id().is_some() && previous.parent_key() != node.parent_key() {
            if let Some(parent_key) = node.parent_key() {
                changes.push(Op::SetParentKey {
                    id: id.clone(),
                    op_id: None,
                    parent_key: parent_key.to_string(),
                });
            }
        }
    }

    created.sort_by_cached_key(|id| depth(fresh, id));
    let creates = created
        .into_iter()
        .filter_map(|id| fresh.get(id).and_then(|node| node.to_create_op(id)));

    deletes.into_iter().chain(changes).chain(creates).collect()
}

/// Same node type under the same parent.
fn same_identity(a: &SerializedNode, b: &SerializedNode) -> bool {
    a.node_type() == b.node_type() && a.parent_id() == b.parent_id()
}

fn record_changes(
    id: &NodeId,
    old: &Map<String, serde_json::Value>,
    new: &Map<String, serde_json::Value>,
    changes: &mut Vec<Op>,
) {
    for key in old.keys().filter(|key| !new.contains_key(*key)) {
        changes.push(Op::DeleteKey {
            id: id.clone(),
            op_id: None,
            key: key.clone(),
        });
    }
    let data: Map<_, _> = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !data.is_empty() {
        changes.push(Op::UpdateRecord {
            id: id.clone(),
            op_id: None,
            data,
        });
    }
}

/// Distance from the root, bounded by the table size so a cycle cannot hang.
fn depth(nodes: &IndexMap<NodeId, SerializedNode>, id: &str) -> usize {
    let mut depth = 0;
    let mut current = nodes.get(id).and_then(SerializedNode::parent_id);
    while let Some(parent) = current {
        depth += 1;
        if depth > nodes.len() {
            break;
        }
        current = nodes.get(parent).and_then(SerializedNode::parent_id);
    }
    depth
}
