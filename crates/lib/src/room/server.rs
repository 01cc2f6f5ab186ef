//! In-process ordering server.
//!
//! [`ServerStorage`] is the authoritative id→node table. It applies client batches
//! in arrival order and decides what every client gets to see: accepted operations
//! are broadcast to all clients (the echo doubles as the sender's acknowledgement),
//! rejected ones are acknowledged to the sender alone, and position collisions are
//! resolved with corrective operations.
//!
//! [`LocalServer`] puts the storage behind a lock and hands out
//! [`ChannelTransport`]s, one per connected client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, trace, warn};

use super::transport::Transport;
use crate::constants::ROOT_ID;
use crate::crdt::{CreateOp, NodeId, NodePool, NodeType, Op, OpId, Position, SerializedNode, make_position};
use crate::sync::{ClientMessage, ServerMessage, SyncError};

/// Actor used for operations the server originates.
const SERVER_ACTOR: u64 = 0;

/// What a client batch produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ServerOutput {
    /// Accepted and corrective operations, for every client including the sender.
    pub to_all: Vec<Op>,
    /// Acknowledgements of rejected operations, for the sender only.
    pub to_sender: Vec<Op>,
}

/// Authoritative storage of one room.
#[derive(Debug, Clone)]
pub struct ServerStorage {
    nodes: IndexMap<NodeId, SerializedNode>,
    op_clock: u64,
}

impl Default for ServerStorage {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl ServerStorage {
    /// Storage holding only a root record with `data`.
    pub fn new(data: Map<String, Value>) -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(
            ROOT_ID.to_string(),
            SerializedNode::Record {
                parent_id: None,
                parent_key: None,
                data,
            },
        );
        Self { nodes, op_clock: 0 }
    }

    pub fn from_items(items: impl IntoIterator<Item = (NodeId, SerializedNode)>) -> Self {
        Self {
            nodes: items.into_iter().collect(),
            op_clock: 0,
        }
    }

    pub fn items(&self) -> Vec<(NodeId, SerializedNode)> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&SerializedNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immutable projection of the stored tree.
    pub fn snapshot(&self) -> crate::Result<Value> {
        let mut pool = NodePool::new();
        let root = pool.load(self.items())?;
        Ok(pool.to_json(&root))
    }

    /// Applies one client batch in order.
    pub fn apply(&mut self, ops: Vec<Op>) -> ServerOutput {
        let mut output = ServerOutput::default();
        for op in ops {
            match self.apply_op(op) {
                Ok(mut accepted) => output.to_all.append(&mut accepted),
                Err(rejected) => {
                    debug!(op = rejected.kind(), id = rejected.id(), "Rejecting op");
                    if let Some(op_id) = rejected.op_id() {
                        output.to_sender.push(Op::ack(op_id.to_string()));
                    }
                }
            }
        }
        output
    }

    /// Returns the operations to broadcast, or the op back when it is rejected.
    fn apply_op(&mut self, mut op: Op) -> Result<Vec<Op>, Op> {
        let corrections = match &mut op {
            Op::CreateRecord(create) => self.create(NodeType::Record, create),
            Op::CreateList(create) => self.create(NodeType::List, create),
            Op::CreateDict(create) => self.create(NodeType::Dict, create),
            Op::CreateLeaf(create) => self.create(NodeType::Leaf, create),
            Op::UpdateRecord { id, data, .. } => self.update_record(id, data),
            Op::DeleteKey { id, key, .. } => self.delete_key(id, key),
            Op::DeleteNode { id, .. } => self.delete_node(id),
            Op::SetParentKey { id, parent_key, .. } => self.set_parent_key(id, parent_key),
        };
        match corrections {
            Some(corrections) => Ok(std::iter::once(op).chain(corrections).collect()),
            None => Err(op),
        }
    }

    fn update_record(&mut self, id: &str, data: &Map<String, Value>) -> Option<Vec<Op>> {
        if !matches!(self.nodes.get(id), Some(SerializedNode::Record { .. })) {
            return None;
        }
        for key in data.keys() {
            self.delete_child_at(id, key);
        }
        if let Some(SerializedNode::Record { data: stored, .. }) = self.nodes.get_mut(id) {
            stored.extend(data.clone());
        }
        Some(Vec::new())
    }

    fn delete_key(&mut self, id: &str, key: &str) -> Option<Vec<Op>> {
        let Some(SerializedNode::Record { data, .. }) = self.nodes.get_mut(id) else {
            return None;
        };
        data.remove(key);
        self.delete_child_at(id, key);
        Some(Vec::new())
    }

    fn delete_node(&mut self, id: &str) -> Option<Vec<Op>> {
        // the root has no parent and is never deleted
        self.nodes.get(id)?.parent_id()?;
        self.delete_subtree(id);
        Some(Vec::new())
    }

    /// Inserts the node of a create op. `None` rejects it; otherwise returns
    /// corrective ops to broadcast after it. May move `create.parent_key`.
    fn create(&mut self, node_type: NodeType, create: &mut CreateOp) -> Option<Vec<Op>> {
        if self.nodes.contains_key(&create.id) {
            return None;
        }
        let parent_type = self.nodes.get(&create.parent_id)?.node_type();
        let mut corrections = Vec::new();
        match parent_type {
            NodeType::Leaf => return None,
            NodeType::Record => {
                let (parent, key) = (create.parent_id.clone(), create.parent_key.clone());
                self.delete_child_at(&parent, &key);
                if let Some(SerializedNode::Record { data, .. }) = self.nodes.get_mut(&parent) {
                    data.remove(&key);
                }
            }
            NodeType::Dict => {
                let (parent, key) = (create.parent_id.clone(), create.parent_key.clone());
                self.delete_child_at(&parent, &key);
            }
            NodeType::List => {
                let position = Position::parse(create.parent_key.as_str()).ok()?;
                if create.is_replace() {
                    if let Some(replaced) = create.replaced_id.clone() {
                        if self.is_child_of(&replaced, &create.parent_id) {
                            self.delete_subtree(&replaced);
                        }
                    }
                    if let Some(occupant) = self.child_at(&create.parent_id, &create.parent_key) {
                        self.delete_subtree(&occupant);
                        corrections.push(Op::DeleteNode {
                            id: occupant,
                            op_id: Some(self.next_op_id()),
                        });
                    }
                } else if self
                    .child_at(&create.parent_id, &create.parent_key)
                    .is_some()
                {
                    let shifted = self.free_position_after(&create.parent_id, &position, None)?;
                    trace!(from = %position, to = %shifted, "Shifting colliding insert");
                    create.parent_key = shifted.to_string();
                }
            }
        }
        let node = serialized_from_create(node_type, create);
        self.nodes.insert(create.id.clone(), node);
        Some(corrections)
    }

    fn set_parent_key(&mut self, id: &str, key: &str) -> Option<Vec<Op>> {
        let parent = self.nodes.get(id)?.parent_id()?.to_string();
        if self.nodes.get(&parent)?.node_type() != NodeType::List {
            return None;
        }
        let position = Position::parse(key).ok()?;
        let mut corrections = Vec::new();
        if let Some(occupant) = self.child_at(&parent, key).filter(|occupant| occupant != id) {
            let shifted = self.free_position_after(&parent, &position, Some(id))?;
            if let Some(node) = self.nodes.get_mut(&occupant) {
                node.set_parent_key(shifted.to_string());
            }
            corrections.push(Op::SetParentKey {
                id: occupant,
                op_id: Some(self.next_op_id()),
                parent_key: shifted.to_string(),
            });
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.set_parent_key(key.to_string());
        }
        Some(corrections)
    }

    /// A position strictly between `position` and the next sibling key.
    fn free_position_after(
        &self,
        list_id: &str,
        position: &Position,
        ignore: Option<&str>,
    ) -> Option<Position> {
        let next = self
            .nodes
            .iter()
            .filter(|(id, node)| {
                node.parent_id() == Some(list_id) && Some(id.as_str()) != ignore
            })
            .filter_map(|(_, node)| node.parent_key().and_then(|key| Position::parse(key).ok()))
            .filter(|key| key > position)
            .min();
        match make_position(Some(position), next.as_ref()) {
            Ok(shifted) => Some(shifted),
            Err(err) => {
                warn!(error = %err, "No free position after {position}");
                None
            }
        }
    }

    fn is_child_of(&self, id: &str, parent: &str) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|node| node.parent_id() == Some(parent))
    }

    fn child_at(&self, parent: &str, key: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.parent_id() == Some(parent) && node.parent_key() == Some(key))
            .map(|(id, _)| id.clone())
    }

    fn delete_child_at(&mut self, parent: &str, key: &str) {
        if let Some(child) = self.child_at(parent, key) {
            self.delete_subtree(&child);
        }
    }

    fn delete_subtree(&mut self, id: &str) {
        let mut pending = vec![id.to_string()];
        while let Some(current) = pending.pop() {
            self.nodes.shift_remove(&current);
            pending.extend(
                self.nodes
                    .iter()
                    .filter(|(_, node)| node.parent_id() == Some(current.as_str()))
                    .map(|(child, _)| child.clone()),
            );
        }
    }

    fn next_op_id(&mut self) -> OpId {
        let id = format!("{SERVER_ACTOR}:{}", self.op_clock);
        self.op_clock += 1;
        id
    }
}

fn serialized_from_create(node_type: NodeType, create: &CreateOp) -> SerializedNode {
    let parent_id = create.parent_id.clone();
    let parent_key = create.parent_key.clone();
    match node_type {
        NodeType::Record => SerializedNode::Record {
            parent_id: Some(parent_id),
            parent_key: Some(parent_key),
            data: create.data.as_object().cloned().unwrap_or_default(),
        },
        NodeType::List => SerializedNode::List {
            parent_id,
            parent_key,
        },
        NodeType::Dict => SerializedNode::Dict {
            parent_id,
            parent_key,
        },
        NodeType::Leaf => SerializedNode::Leaf {
            parent_id,
            parent_key,
            data: create.data.clone(),
        },
    }
}

// ===== LocalServer =====

#[derive(Debug)]
struct Hub {
    storage: ServerStorage,
    clients: HashMap<u64, mpsc::UnboundedSender<ServerMessage>>,
    next_actor: u64,
}

impl Hub {
    fn handle(&mut self, actor: u64, messages: Vec<ClientMessage>) {
        for message in messages {
            match message {
                ClientMessage::FetchStorage => {
                    let items = self.storage.items();
                    self.send_to(actor, ServerMessage::InitialStorageState { items });
                }
                ClientMessage::UpdateStorage { ops } => {
                    let count = ops.len();
                    let output = self.storage.apply(ops);
                    debug!(
                        actor,
                        received = count,
                        broadcast = output.to_all.len(),
                        rejected = output.to_sender.len(),
                        "Sequenced client batch"
                    );
                    if !output.to_all.is_empty() {
                        let actors: Vec<u64> = self.clients.keys().copied().collect();
                        for client in actors {
                            self.send_to(
                                client,
                                ServerMessage::UpdateStorage {
                                    ops: output.to_all.clone(),
                                },
                            );
                        }
                    }
                    if !output.to_sender.is_empty() {
                        self.send_to(
                            actor,
                            ServerMessage::UpdateStorage {
                                ops: output.to_sender,
                            },
                        );
                    }
                }
                ClientMessage::UpdatePresence { data } => {
                    trace!(actor, keys = data.len(), "Presence update");
                }
            }
        }
    }

    fn send_to(&mut self, actor: u64, message: ServerMessage) {
        let delivered = self
            .clients
            .get(&actor)
            .is_some_and(|client| client.send(message).is_ok());
        if !delivered {
            self.clients.remove(&actor);
        }
    }
}

/// Ordering server running in the same process as its clients.
#[derive(Debug, Clone)]
pub struct LocalServer {
    hub: Arc<Mutex<Hub>>,
}

impl Default for LocalServer {
    fn default() -> Self {
        Self::new(ServerStorage::default())
    }
}

impl LocalServer {
    pub fn new(storage: ServerStorage) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                storage,
                clients: HashMap::new(),
                next_actor: SERVER_ACTOR + 1,
            })),
        }
    }

    /// Opens a session with a fresh actor id.
    pub async fn connect(&self) -> ChannelTransport {
        let mut hub = self.hub.lock().await;
        let actor = hub.next_actor;
        hub.next_actor += 1;
        let (sender, inbox) = mpsc::unbounded_channel();
        hub.clients.insert(actor, sender);
        info!(actor, clients = hub.clients.len(), "Client connected");
        ChannelTransport {
            actor,
            hub: Arc::clone(&self.hub),
            inbox,
        }
    }

    /// Drops the session of `actor`, as a network failure would.
    pub async fn disconnect(&self, actor: u64) -> bool {
        let removed = self.hub.lock().await.clients.remove(&actor).is_some();
        if removed {
            info!(actor, "Client disconnected by server");
        }
        removed
    }

    pub async fn client_count(&self) -> usize {
        self.hub.lock().await.clients.len()
    }

    pub async fn items(&self) -> Vec<(NodeId, SerializedNode)> {
        self.hub.lock().await.storage.items()
    }

    pub async fn snapshot(&self) -> crate::Result<Value> {
        self.hub.lock().await.storage.snapshot()
    }
}

/// Client end of a [`LocalServer`] session.
#[derive(Debug)]
pub struct ChannelTransport {
    actor: u64,
    hub: Arc<Mutex<Hub>>,
    inbox: mpsc::UnboundedReceiver<ServerMessage>,
}

#[async_trait]
impl Transport for ChannelTransport {
    fn actor(&self) -> u64 {
        self.actor
    }

    async fn send(&mut self, messages: Vec<ClientMessage>) -> Result<(), SyncError> {
        let mut hub = self.hub.lock().await;
        if !hub.clients.contains_key(&self.actor) {
            return Err(SyncError::Transport(format!(
                "session of actor {} is closed",
                self.actor
            )));
        }
        hub.handle(self.actor, messages);
        Ok(())
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbox.recv().await
    }
}
