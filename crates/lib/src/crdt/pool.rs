//! Node registry: the id→node arena, id generators and operation dispatch.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{trace, warn};

use super::delta::{ListUpdate, StorageUpdate};
use super::dict::{self, DictNode};
use super::errors::CrdtError;
use super::leaf::LeafNode;
use super::list::{self, ListNode};
use super::node::{self, DetachedTree, Node, NodeKind, NodeLookup, ParentLink};
use super::op::{CreateOp, NodeId, NodeType, Op, OpId, SerializedNode};
use super::position::Position;
use super::record::{self, Field, RecordNode};
use super::value::LiveValue;

/// Why an inbound operation is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSource {
    /// First sight of another client's operation.
    Remote,
    /// Server echo of one of our own operations.
    Ack,
    /// Undo, redo, or replay of unacknowledged operations after a reconnect.
    Replay,
}

/// Outcome of applying one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyResult {
    NotModified,
    Modified {
        update: StorageUpdate,
        reverse: Vec<Op>,
    },
}

impl ApplyResult {
    pub fn is_modified(&self) -> bool {
        matches!(self, ApplyResult::Modified { .. })
    }

    pub(crate) fn list(list_id: &str, updates: Vec<ListUpdate>, reverse: Vec<Op>) -> Self {
        if updates.is_empty() && reverse.is_empty() {
            return ApplyResult::NotModified;
        }
        ApplyResult::Modified {
            update: StorageUpdate::list(list_id, updates),
            reverse,
        }
    }
}

/// Result of a local mutation, handed to the document for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalChange {
    /// Forward operations for the server, with op ids.
    pub ops: Vec<Op>,
    /// Operations undoing this change.
    pub reverse: Vec<Op>,
    pub update: StorageUpdate,
}

/// Arena of attached nodes.
#[derive(Debug, Default)]
pub struct NodePool {
    nodes: HashMap<NodeId, Node>,
    actor: Option<u64>,
    node_clock: u64,
    op_clock: u64,
}

impl NodeLookup for NodePool {
    fn lookup(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_actor(&mut self, actor: u64) {
        self.actor = Some(actor);
    }

    pub fn actor(&self) -> Option<u64> {
        self.actor
    }

    pub fn generate_id(&mut self) -> Result<NodeId, CrdtError> {
        let actor = self.actor.ok_or(CrdtError::NoActor)?;
        let id = format!("{actor}:{}", self.node_clock);
        self.node_clock += 1;
        Ok(id)
    }

    pub fn generate_op_id(&mut self) -> Result<OpId, CrdtError> {
        let actor = self.actor.ok_or(CrdtError::NoActor)?;
        let id = format!("{actor}:{}", self.op_clock);
        self.op_clock += 1;
        Ok(id)
    }

    /// Fills in missing op ids.
    pub(crate) fn assign_op_ids(&mut self, ops: &mut [Op]) -> Result<(), CrdtError> {
        for op in ops.iter_mut().filter(|op| op.op_id().is_none()) {
            op.set_op_id(self.generate_op_id()?);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: &str) -> Result<&Node, CrdtError> {
        self.nodes
            .get(id)
            .ok_or_else(|| CrdtError::NodeNotFound { id: id.to_string() })
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, CrdtError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CrdtError::NodeNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn record(&self, id: &str) -> Result<&RecordNode, CrdtError> {
        match self.node(id)?.kind() {
            NodeKind::Record(record) => Ok(record),
            other => Err(mismatch(id, NodeType::Record, other)),
        }
    }

    pub(crate) fn record_mut(&mut self, id: &str) -> Result<&mut RecordNode, CrdtError> {
        match self.node_mut(id)?.kind_mut() {
            NodeKind::Record(record) => Ok(record),
            other => Err(mismatch(id, NodeType::Record, other)),
        }
    }

    pub fn dict(&self, id: &str) -> Result<&DictNode, CrdtError> {
        match self.node(id)?.kind() {
            NodeKind::Dict(dict) => Ok(dict),
            other => Err(mismatch(id, NodeType::Dict, other)),
        }
    }

    pub(crate) fn dict_mut(&mut self, id: &str) -> Result<&mut DictNode, CrdtError> {
        match self.node_mut(id)?.kind_mut() {
            NodeKind::Dict(dict) => Ok(dict),
            other => Err(mismatch(id, NodeType::Dict, other)),
        }
    }

    pub fn list(&self, id: &str) -> Result<&ListNode, CrdtError> {
        match self.node(id)?.kind() {
            NodeKind::List(list) => Ok(list),
            other => Err(mismatch(id, NodeType::List, other)),
        }
    }

    pub(crate) fn list_mut(&mut self, id: &str) -> Result<&mut ListNode, CrdtError> {
        match self.node_mut(id)?.kind_mut() {
            NodeKind::List(list) => Ok(list),
            other => Err(mismatch(id, NodeType::List, other)),
        }
    }

    pub fn leaf(&self, id: &str) -> Result<&LeafNode, CrdtError> {
        match self.node(id)?.kind() {
            NodeKind::Leaf(leaf) => Ok(leaf),
            other => Err(mismatch(id, NodeType::Leaf, other)),
        }
    }

    fn insert(&mut self, node: Node) -> Result<(), CrdtError> {
        if self.nodes.contains_key(node.id()) {
            return Err(CrdtError::AlreadyAttached {
                id: node.id().to_string(),
            });
        }
        self.nodes.insert(node.id().to_string(), node);
        Ok(())
    }

    /// Updates the key in a child's parent link.
    pub(crate) fn set_parent_key(&mut self, id: &str, key: &str) -> Result<(), CrdtError> {
        let node = self.node_mut(id)?;
        let parent = match node.parent() {
            ParentLink::HasParent { parent, .. } => parent.clone(),
            _ => {
                return Err(CrdtError::InvalidParent {
                    id: id.to_string(),
                    reason: "node has no parent to be keyed under".to_string(),
                });
            }
        };
        node.set_parent(ParentLink::HasParent {
            parent,
            key: key.to_string(),
        });
        Ok(())
    }

    /// Drops cached projections from `id` up to the root.
    pub(crate) fn invalidate(&mut self, id: &str) {
        let mut current = Some(id.to_string());
        while let Some(id) = current {
            current = match self.nodes.get_mut(&id) {
                Some(node) => {
                    node.invalidate();
                    node.parent().parent().map(str::to_string)
                }
                None => None,
            };
        }
    }

    /// Immutable projection of the subtree at `id`; `Null` for unknown ids.
    pub fn to_json(&self, id: &str) -> Value {
        node::project(self, id)
    }

    pub fn serialize(&self, id: &str) -> Result<SerializedNode, CrdtError> {
        self.node(id)?.serialize()
    }

    /// Every attached node in serialized form, ordered by id.
    pub fn serialized_items(&self) -> Result<IndexMap<NodeId, SerializedNode>, CrdtError> {
        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| Ok((id.clone(), self.serialize(id)?)))
            .collect()
    }

    /// Create operations for the attached subtree at `id`.
    pub(crate) fn create_ops(&self, id: &str) -> Result<Vec<Op>, CrdtError> {
        let node = self.node(id)?;
        match node.parent() {
            ParentLink::HasParent { parent, key } => Ok(node::subtree_ops(self, id, parent, key)),
            _ => Err(CrdtError::InvalidParent {
                id: id.to_string(),
                reason: "only attached children can be recreated".to_string(),
            }),
        }
    }

    /// Attaches a detached value under `parent_id` at `key`, generating ids recursively.
    ///
    /// The caller links the returned id into the parent's container.
    pub(crate) fn attach_value(
        &mut self,
        value: &LiveValue,
        parent_id: &str,
        key: &str,
    ) -> Result<NodeId, CrdtError> {
        let id = self.generate_id()?;
        let kind = match value {
            LiveValue::Json(data) => NodeKind::Leaf(LeafNode::new(data.clone())),
            LiveValue::Record(fields) => {
                let mut record = RecordNode::default();
                for (field_key, field_value) in fields {
                    let field = match field_value {
                        LiveValue::Json(data) => Field::Value(data.clone()),
                        nested => Field::Node(self.attach_value(nested, &id, field_key)?),
                    };
                    record.insert_field(field_key.clone(), field);
                }
                NodeKind::Record(record)
            }
            LiveValue::Dict(entries) => {
                let mut dict = DictNode::default();
                for (entry_key, entry_value) in entries {
                    let child = self.attach_value(entry_value, &id, entry_key)?;
                    dict.insert_entry(entry_key.clone(), child);
                }
                NodeKind::Dict(dict)
            }
            LiveValue::List(items) => {
                let mut list = ListNode::default();
                let mut last: Option<Position> = None;
                for item in items {
                    let position = super::position::make_position(last.as_ref(), None)?;
                    let child = self.attach_value(item, &id, position.as_str())?;
                    list.push_sorted(child, position.clone());
                    last = Some(position);
                }
                NodeKind::List(list)
            }
        };
        let link = ParentLink::HasParent {
            parent: parent_id.to_string(),
            key: key.to_string(),
        };
        self.insert(Node::new(id.clone(), link, kind))?;
        Ok(id)
    }

    /// Inserts the node described by a create operation at `key` of its parent.
    ///
    /// The caller links the id into the parent's container.
    pub(crate) fn create_from_op(
        &mut self,
        node_type: NodeType,
        op: &CreateOp,
        key: &str,
    ) -> Result<(), CrdtError> {
        let link = ParentLink::HasParent {
            parent: op.parent_id.clone(),
            key: key.to_string(),
        };
        let kind = NodeKind::from_data(node_type, &op.data);
        self.insert(Node::new(op.id.clone(), link, kind))
    }

    /// Removes the subtree at `id` from the arena.
    ///
    /// The caller unlinks it from the parent's container.
    pub(crate) fn detach(&mut self, id: &str) -> Result<DetachedTree, CrdtError> {
        let mut root = self
            .nodes
            .remove(id)
            .ok_or_else(|| CrdtError::NodeNotFound { id: id.to_string() })?;
        let old_key = root.parent().key().unwrap_or_default().to_string();
        root.set_parent(ParentLink::Orphaned { old_key });
        root.invalidate();

        let mut pending = root.kind().owned_children();
        let mut nodes = HashMap::from([(id.to_string(), root)]);
        while let Some(child) = pending.pop() {
            if let Some(node) = self.nodes.remove(&child) {
                pending.extend(node.kind().owned_children());
                nodes.insert(child, node);
            }
        }
        Ok(DetachedTree::new(id.to_string(), nodes))
    }

    /// Replaces the arena with a storage snapshot and returns the root id.
    pub(crate) fn load(
        &mut self,
        items: Vec<(NodeId, SerializedNode)>,
    ) -> Result<NodeId, CrdtError> {
        let mut root = None;
        let mut children: HashMap<NodeId, Vec<(NodeId, SerializedNode)>> = HashMap::new();
        for (id, serialized) in items {
            match serialized.parent_id() {
                Some(parent) => children
                    .entry(parent.to_string())
                    .or_default()
                    .push((id, serialized)),
                None if root.is_some() => {
                    return Err(CrdtError::InvalidSnapshot {
                        reason: format!("second root node {id}"),
                    });
                }
                None => root = Some((id, serialized)),
            }
        }
        let (root_id, root_node) = root.ok_or_else(|| CrdtError::InvalidSnapshot {
            reason: "snapshot has no root node".to_string(),
        })?;
        if root_node.node_type() != NodeType::Record {
            return Err(CrdtError::InvalidSnapshot {
                reason: format!("root {root_id} is not a record"),
            });
        }

        self.nodes.clear();
        let mut queue = VecDeque::from([(root_id.clone(), root_node)]);
        while let Some((id, serialized)) = queue.pop_front() {
            self.insert(Node::from_serialized(&id, &serialized))?;
            if let (Some(parent), Some(key)) = (serialized.parent_id(), serialized.parent_key()) {
                self.link_child(parent, &id, key)?;
            }
            if let Some(next) = children.remove(&id) {
                queue.extend(next);
            }
        }
        if !children.is_empty() {
            warn!(
                count = children.values().map(Vec::len).sum::<usize>(),
                "Ignoring snapshot nodes unreachable from the root"
            );
        }
        Ok(root_id)
    }

    fn link_child(&mut self, parent_id: &str, child_id: &str, key: &str) -> Result<(), CrdtError> {
        match self.node_mut(parent_id)?.kind_mut() {
            NodeKind::Record(record) => {
                record.insert_field(key.to_string(), Field::Node(child_id.to_string()));
            }
            NodeKind::Dict(dict) => {
                dict.insert_entry(key.to_string(), child_id.to_string());
            }
            NodeKind::List(list) => {
                list.push_sorted(child_id.to_string(), Position::parse(key)?);
            }
            NodeKind::Leaf(_) => {
                return Err(CrdtError::InvalidSnapshot {
                    reason: format!("leaf {parent_id} cannot have child {child_id}"),
                });
            }
        }
        Ok(())
    }

    /// Applies one inbound operation with the conflict policy of its origin.
    pub(crate) fn apply_op(&mut self, op: &Op, source: OpSource) -> Result<ApplyResult, CrdtError> {
        if op.is_ack() {
            return Ok(ApplyResult::NotModified);
        }
        trace!(op = op.kind(), id = op.id(), ?source, "Applying op");
        match op {
            Op::CreateRecord(create)
            | Op::CreateList(create)
            | Op::CreateDict(create)
            | Op::CreateLeaf(create) => {
                let node_type = match op {
                    Op::CreateRecord(_) => NodeType::Record,
                    Op::CreateList(_) => NodeType::List,
                    Op::CreateDict(_) => NodeType::Dict,
                    _ => NodeType::Leaf,
                };
                let Some(parent) = self.get(&create.parent_id) else {
                    return Ok(ApplyResult::NotModified);
                };
                match parent.node_type() {
                    NodeType::Record => record::attach_child(self, node_type, create, source),
                    NodeType::Dict => dict::attach_child(self, node_type, create, source),
                    NodeType::List => list::attach_child(self, node_type, create, source),
                    NodeType::Leaf => Err(CrdtError::InvalidParent {
                        id: create.parent_id.clone(),
                        reason: "a leaf cannot have children".to_string(),
                    }),
                }
            }
            Op::UpdateRecord { id, op_id, data } => {
                if !self.contains(id) {
                    return Ok(ApplyResult::NotModified);
                }
                record::apply_update(self, id, op_id.as_deref(), data, source)
            }
            Op::DeleteKey { id, key, .. } => {
                if !self.contains(id) {
                    return Ok(ApplyResult::NotModified);
                }
                record::apply_delete_key(self, id, key, source)
            }
            Op::DeleteNode { id, .. } => {
                let Some(parent) = self.get(id).and_then(|node| node.parent().parent()) else {
                    return Ok(ApplyResult::NotModified);
                };
                let parent = parent.to_string();
                self.detach_child(&parent, id)
            }
            Op::SetParentKey { id, parent_key, .. } => {
                let Some(parent) = self.get(id).and_then(|node| node.parent().parent()) else {
                    return Ok(ApplyResult::NotModified);
                };
                let parent = parent.to_string();
                if self.node(&parent)?.node_type() != NodeType::List {
                    return Ok(ApplyResult::NotModified);
                }
                let position = Position::parse(parent_key.as_str())?;
                list::set_child_key(self, &parent, id, position, source)
            }
        }
    }

    /// Clears the conflict markers left by a local op the server rejected.
    pub(crate) fn release_pending(&mut self, op: &Op) {
        let (target, op_id) = match op {
            Op::CreateRecord(create)
            | Op::CreateList(create)
            | Op::CreateDict(create)
            | Op::CreateLeaf(create) => (create.parent_id.as_str(), create.op_id.as_deref()),
            other => (other.id(), other.op_id()),
        };
        let Some(op_id) = op_id else {
            return;
        };
        let Some(node) = self.nodes.get_mut(target) else {
            return;
        };
        match node.kind_mut() {
            NodeKind::Record(record) => record.release_pending(op_id),
            NodeKind::Dict(dict) => dict.release_pending(op_id),
            NodeKind::List(list) => list.release_pending(op_id),
            NodeKind::Leaf(_) => {}
        }
    }

    /// Removes `child_id` from its parent's container and from the arena.
    pub(crate) fn detach_child(
        &mut self,
        parent_id: &str,
        child_id: &str,
    ) -> Result<ApplyResult, CrdtError> {
        match self.node(parent_id)?.node_type() {
            NodeType::Record => record::detach_child(self, parent_id, child_id),
            NodeType::Dict => dict::detach_child(self, parent_id, child_id),
            NodeType::List => list::detach_child(self, parent_id, child_id),
            NodeType::Leaf => Ok(ApplyResult::NotModified),
        }
    }
}

fn mismatch(id: &str, expected: NodeType, actual: &NodeKind) -> CrdtError {
    CrdtError::TypeMismatch {
        id: id.to_string(),
        expected: expected.name(),
        actual: actual.node_type().name(),
    }
}
