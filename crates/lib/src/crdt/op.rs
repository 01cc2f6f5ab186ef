//! Operations and serialized node shapes exchanged with the server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::ACK_OP_ID;

/// Node id, formatted `actor:counter` (the root record is `"root"`).
pub type NodeId = String;

/// Operation id, formatted `actor:counter`.
pub type OpId = String;

/// The four node kinds of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Record,
    List,
    Dict,
    Leaf,
}

impl NodeType {
    pub fn name(self) -> &'static str {
        match self {
            NodeType::Record => "Record",
            NodeType::List => "List",
            NodeType::Dict => "Dict",
            NodeType::Leaf => "Leaf",
        }
    }
}

/// Annotation on a list create meaning "this node atomically replaces `replaced_id`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Replace,
}

/// Payload shared by the four create operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOp {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<OpId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_id: Option<NodeId>,
    pub parent_id: NodeId,
    pub parent_key: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl CreateOp {
    pub fn new(id: NodeId, parent_id: NodeId, parent_key: String) -> Self {
        Self {
            id,
            op_id: None,
            intent: None,
            replaced_id: None,
            parent_id,
            parent_key,
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Marks this create as replacing `replaced_id` at the same position.
    pub fn replacing(mut self, replaced_id: NodeId) -> Self {
        self.intent = Some(Intent::Replace);
        self.replaced_id = Some(replaced_id);
        self
    }

    pub fn is_replace(&self) -> bool {
        self.intent == Some(Intent::Replace)
    }
}

/// The wire unit of change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Op {
    CreateRecord(CreateOp),
    CreateList(CreateOp),
    CreateDict(CreateOp),
    CreateLeaf(CreateOp),
    UpdateRecord {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
        data: Map<String, Value>,
    },
    DeleteNode {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
    },
    DeleteKey {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
        key: String,
    },
    SetParentKey {
        id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
        parent_key: String,
    },
}

impl Op {
    /// Builds the create operation for a node of the given type.
    pub fn create(node_type: NodeType, create: CreateOp) -> Self {
        match node_type {
            NodeType::Record => Op::CreateRecord(create),
            NodeType::List => Op::CreateList(create),
            NodeType::Dict => Op::CreateDict(create),
            NodeType::Leaf => Op::CreateLeaf(create),
        }
    }

    /// Server acknowledgement of a rejected operation.
    pub fn ack(op_id: OpId) -> Self {
        Op::DeleteNode {
            id: ACK_OP_ID.to_string(),
            op_id: Some(op_id),
        }
    }

    pub fn delete_node(id: impl Into<NodeId>) -> Self {
        Op::DeleteNode {
            id: id.into(),
            op_id: None,
        }
    }

    /// Id of the node this operation creates or targets.
    pub fn id(&self) -> &str {
        match self {
            Op::CreateRecord(c) | Op::CreateList(c) | Op::CreateDict(c) | Op::CreateLeaf(c) => {
                &c.id
            }
            Op::UpdateRecord { id, .. }
            | Op::DeleteNode { id, .. }
            | Op::DeleteKey { id, .. }
            | Op::SetParentKey { id, .. } => id,
        }
    }

    pub fn op_id(&self) -> Option<&str> {
        match self {
            Op::CreateRecord(c) | Op::CreateList(c) | Op::CreateDict(c) | Op::CreateLeaf(c) => {
                c.op_id.as_deref()
            }
            Op::UpdateRecord { op_id, .. }
            | Op::DeleteNode { op_id, .. }
            | Op::DeleteKey { op_id, .. }
            | Op::SetParentKey { op_id, .. } => op_id.as_deref(),
        }
    }

    pub fn set_op_id(&mut self, value: OpId) {
        let slot = match self {
            Op::CreateRecord(c) | Op::CreateList(c) | Op::CreateDict(c) | Op::CreateLeaf(c) => {
                &mut c.op_id
            }
            Op::UpdateRecord { op_id, .. }
            | Op::DeleteNode { op_id, .. }
            | Op::DeleteKey { op_id, .. }
            | Op::SetParentKey { op_id, .. } => op_id,
        };
        *slot = Some(value);
    }

    /// Returns the create payload and node type if this is a create operation.
    pub fn as_create(&self) -> Option<(NodeType, &CreateOp)> {
        match self {
            Op::CreateRecord(c) => Some((NodeType::Record, c)),
            Op::CreateList(c) => Some((NodeType::List, c)),
            Op::CreateDict(c) => Some((NodeType::Dict, c)),
            Op::CreateLeaf(c) => Some((NodeType::Leaf, c)),
            _ => None,
        }
    }

    pub fn as_create_mut(&mut self) -> Option<&mut CreateOp> {
        match self {
            Op::CreateRecord(c) | Op::CreateList(c) | Op::CreateDict(c) | Op::CreateLeaf(c) => {
                Some(c)
            }
            _ => None,
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Op::DeleteNode { id, .. } if id == ACK_OP_ID)
    }

    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::CreateRecord(_) => "CreateRecord",
            Op::CreateList(_) => "CreateList",
            Op::CreateDict(_) => "CreateDict",
            Op::CreateLeaf(_) => "CreateLeaf",
            Op::UpdateRecord { .. } => "UpdateRecord",
            Op::DeleteNode { .. } => "DeleteNode",
            Op::DeleteKey { .. } => "DeleteKey",
            Op::SetParentKey { .. } => "SetParentKey",
        }
    }
}

/// Serialized form of an attached node, as found in storage snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum SerializedNode {
    Record {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<NodeId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_key: Option<String>,
        data: Map<String, Value>,
    },
    List {
        parent_id: NodeId,
        parent_key: String,
    },
    Dict {
        parent_id: NodeId,
        parent_key: String,
    },
    Leaf {
        parent_id: NodeId,
        parent_key: String,
        #[serde(default)]
        data: Value,
    },
}

impl SerializedNode {
    pub fn node_type(&self) -> NodeType {
        match self {
            SerializedNode::Record { .. } => NodeType::Record,
            SerializedNode::List { .. } => NodeType::List,
            SerializedNode::Dict { .. } => NodeType::Dict,
            SerializedNode::Leaf { .. } => NodeType::Leaf,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            SerializedNode::Record { parent_id, .. } => parent_id.as_deref(),
            SerializedNode::List { parent_id, .. }
            | SerializedNode::Dict { parent_id, .. }
            | SerializedNode::Leaf { parent_id, .. } => Some(parent_id),
        }
    }

    pub fn parent_key(&self) -> Option<&str> {
        match self {
            SerializedNode::Record { parent_key, .. } => parent_key.as_deref(),
            SerializedNode::List { parent_key, .. }
            | SerializedNode::Dict { parent_key, .. }
            | SerializedNode::Leaf { parent_key, .. } => Some(parent_key),
        }
    }

    pub(crate) fn set_parent_key(&mut self, key: String) {
        match self {
            SerializedNode::Record { parent_key, .. } => *parent_key = Some(key),
            SerializedNode::List { parent_key, .. }
            | SerializedNode::Dict { parent_key, .. }
            | SerializedNode::Leaf { parent_key, .. } => *parent_key = key,
        }
    }

    /// Create operation that recreates this node under its recorded parent.
    pub fn to_create_op(&self, id: &str) -> Option<Op> {
        let parent_id = self.parent_id()?.to_string();
        let parent_key = self.parent_key()?.to_string();
        let create = CreateOp::new(id.to_string(), parent_id, parent_key);
        let create = match self {
            SerializedNode::Record { data, .. } => create.with_data(Value::Object(data.clone())),
            SerializedNode::Leaf { data, .. } => create.with_data(data.clone()),
            SerializedNode::List { .. } | SerializedNode::Dict { .. } => create,
        };
        Some(Op::create(self.node_type(), create))
    }
}
