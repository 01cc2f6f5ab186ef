//! Node base: parent links, node kinds, serialization and op generation.
//!
//! Nodes live in the [`NodePool`](super::pool::NodePool) arena and refer to their
//! children by id. A node removed from the arena travels as a [`DetachedTree`]
//! that remembers its last key, which is where its reverse operations recreate it.

use std::cell::OnceCell;
use std::collections::HashMap;

use serde_json::{Map, Value};

use super::dict::DictNode;
use super::errors::CrdtError;
use super::leaf::LeafNode;
use super::list::ListNode;
use super::op::{CreateOp, NodeId, NodeType, Op, SerializedNode};
use super::record::{Field, RecordNode};

/// Where a node hangs in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentLink {
    /// The root record.
    NoParent,
    /// Attached under `parent` at `key` (a record key, dictionary key or list position).
    HasParent { parent: NodeId, key: String },
    /// Removed from the tree; `old_key` is where reverse operations put it back.
    Orphaned { old_key: String },
}

impl ParentLink {
    pub fn parent(&self) -> Option<&str> {
        match self {
            ParentLink::HasParent { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// Current key, or the last key for an orphaned node.
    pub fn key(&self) -> Option<&str> {
        match self {
            ParentLink::HasParent { key, .. } => Some(key),
            ParentLink::Orphaned { old_key } => Some(old_key),
            ParentLink::NoParent => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Record(RecordNode),
    Dict(DictNode),
    List(ListNode),
    Leaf(LeafNode),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Record(_) => NodeType::Record,
            NodeKind::Dict(_) => NodeType::Dict,
            NodeKind::List(_) => NodeType::List,
            NodeKind::Leaf(_) => NodeType::Leaf,
        }
    }

    /// Builds an empty node of the given type from create-op data.
    pub(crate) fn from_data(node_type: NodeType, data: &Value) -> Self {
        match node_type {
            NodeType::Record => NodeKind::Record(RecordNode::from_data(data)),
            NodeType::Dict => NodeKind::Dict(DictNode::default()),
            NodeType::List => NodeKind::List(ListNode::default()),
            NodeType::Leaf => NodeKind::Leaf(LeafNode::new(data.clone())),
        }
    }

    /// Every child id this node owns, including list children evicted by a replace.
    pub(crate) fn owned_children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Record(record) => record.child_nodes().map(|(_, id)| id.clone()).collect(),
            NodeKind::Dict(dict) => dict.entries().map(|(_, id)| id.clone()).collect(),
            NodeKind::List(list) => list
                .items()
                .iter()
                .map(|item| item.id.clone())
                .chain(list.implicitly_deleted().cloned())
                .collect(),
            NodeKind::Leaf(_) => Vec::new(),
        }
    }
}

/// A node of the tree.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    parent: ParentLink,
    kind: NodeKind,
    cache: OnceCell<Value>,
}

impl Node {
    pub(crate) fn new(id: NodeId, parent: ParentLink, kind: NodeKind) -> Self {
        Self {
            id,
            parent,
            kind,
            cache: OnceCell::new(),
        }
    }

    pub(crate) fn from_serialized(id: &str, serialized: &SerializedNode) -> Self {
        let parent = match (serialized.parent_id(), serialized.parent_key()) {
            (Some(parent), Some(key)) => ParentLink::HasParent {
                parent: parent.to_string(),
                key: key.to_string(),
            },
            _ => ParentLink::NoParent,
        };
        let kind = match serialized {
            SerializedNode::Record { data, .. } => {
                NodeKind::Record(RecordNode::from_data(&Value::Object(data.clone())))
            }
            SerializedNode::List { .. } => NodeKind::List(ListNode::default()),
            SerializedNode::Dict { .. } => NodeKind::Dict(DictNode::default()),
            SerializedNode::Leaf { data, .. } => NodeKind::Leaf(LeafNode::new(data.clone())),
        };
        Node::new(id.to_string(), parent, kind)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> &ParentLink {
        &self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub(crate) fn set_parent(&mut self, parent: ParentLink) {
        self.parent = parent;
    }

    pub(crate) fn invalidate(&mut self) {
        self.cache.take();
    }

    /// Serialized form for storage snapshots. Orphaned nodes cannot be serialized.
    pub fn serialize(&self) -> Result<SerializedNode, CrdtError> {
        let (parent_id, parent_key) = match &self.parent {
            ParentLink::HasParent { parent, key } => (parent.clone(), key.clone()),
            ParentLink::NoParent => {
                return match &self.kind {
                    NodeKind::Record(record) => Ok(SerializedNode::Record {
                        parent_id: None,
                        parent_key: None,
                        data: record.data(),
                    }),
                    _ => Err(CrdtError::InvalidParent {
                        id: self.id.clone(),
                        reason: "only a record can be the root".to_string(),
                    }),
                };
            }
            ParentLink::Orphaned { .. } => {
                return Err(CrdtError::DetachedNode {
                    id: self.id.clone(),
                });
            }
        };
        Ok(match &self.kind {
            NodeKind::Record(record) => SerializedNode::Record {
                parent_id: Some(parent_id),
                parent_key: Some(parent_key),
                data: record.data(),
            },
            NodeKind::List(_) => SerializedNode::List {
                parent_id,
                parent_key,
            },
            NodeKind::Dict(_) => SerializedNode::Dict {
                parent_id,
                parent_key,
            },
            NodeKind::Leaf(leaf) => SerializedNode::Leaf {
                parent_id,
                parent_key,
                data: leaf.data().clone(),
            },
        })
    }
}

/// Read access to a set of nodes, attached or detached.
pub(crate) trait NodeLookup {
    fn lookup(&self, id: &str) -> Option<&Node>;
}

/// Immutable projection of a node, cached until the subtree changes.
pub(crate) fn project(nodes: &impl NodeLookup, id: &str) -> Value {
    let Some(node) = nodes.lookup(id) else {
        return Value::Null;
    };
    node.cache
        .get_or_init(|| match &node.kind {
            NodeKind::Record(record) => {
                let mut object = Map::new();
                for (key, field) in record.fields() {
                    let value = match field {
                        Field::Value(value) => value.clone(),
                        Field::Node(child) => project(nodes, child),
                    };
                    object.insert(key.clone(), value);
                }
                Value::Object(object)
            }
            NodeKind::Dict(dict) => Value::Object(
                dict.entries()
                    .map(|(key, child)| (key.clone(), project(nodes, child)))
                    .collect(),
            ),
            NodeKind::List(list) => Value::Array(
                list.items()
                    .iter()
                    .map(|item| project(nodes, &item.id))
                    .collect(),
            ),
            NodeKind::Leaf(leaf) => leaf.data().clone(),
        })
        .clone()
}

/// Create operations rebuilding the subtree at `id` under `parent_id`/`parent_key`,
/// parents before children. Op ids are left empty.
pub(crate) fn subtree_ops(
    nodes: &impl NodeLookup,
    id: &str,
    parent_id: &str,
    parent_key: &str,
) -> Vec<Op> {
    let mut ops = Vec::new();
    push_subtree_ops(nodes, id, parent_id, parent_key, &mut ops);
    ops
}

fn push_subtree_ops(
    nodes: &impl NodeLookup,
    id: &str,
    parent_id: &str,
    parent_key: &str,
    ops: &mut Vec<Op>,
) {
    let Some(node) = nodes.lookup(id) else {
        return;
    };
    let create = CreateOp::new(id.to_string(), parent_id.to_string(), parent_key.to_string());
    match &node.kind {
        NodeKind::Record(record) => {
            ops.push(Op::CreateRecord(
                create.with_data(Value::Object(record.data())),
            ));
            for (key, child) in record.child_nodes() {
                push_subtree_ops(nodes, child, id, key, ops);
            }
        }
        NodeKind::Dict(dict) => {
            ops.push(Op::CreateDict(create));
            for (key, child) in dict.entries() {
                push_subtree_ops(nodes, child, id, key, ops);
            }
        }
        NodeKind::List(list) => {
            ops.push(Op::CreateList(create));
            for item in list.items() {
                push_subtree_ops(nodes, &item.id, id, item.position.as_str(), ops);
            }
        }
        NodeKind::Leaf(leaf) => ops.push(Op::CreateLeaf(create.with_data(leaf.data().clone()))),
    }
}

/// A subtree removed from the pool.
#[derive(Debug, Clone)]
pub struct DetachedTree {
    root: NodeId,
    nodes: HashMap<NodeId, Node>,
}

impl DetachedTree {
    pub(crate) fn new(root: NodeId, nodes: HashMap<NodeId, Node>) -> Self {
        Self { root, nodes }
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    /// Key the root had before it was detached.
    pub fn old_key(&self) -> &str {
        self.nodes
            .get(&self.root)
            .and_then(|node| node.parent.key())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Operations recreating the subtree at its old key.
    pub fn to_ops(&self, parent_id: &str) -> Vec<Op> {
        subtree_ops(self, &self.root, parent_id, self.old_key())
    }

    /// Operations recreating the subtree at `parent_key`.
    pub fn to_ops_at(&self, parent_id: &str, parent_key: &str) -> Vec<Op> {
        subtree_ops(self, &self.root, parent_id, parent_key)
    }

    pub fn to_json(&self) -> Value {
        project(self, &self.root)
    }
}

impl NodeLookup for DetachedTree {
    fn lookup(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }
}
