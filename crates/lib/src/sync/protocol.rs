//! Messages exchanged between a document and the ordering server.
//!
//! Framing belongs to the transport; these are the JSON shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crdt::{NodeId, Op, SerializedNode};

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    UpdateStorage { ops: Vec<Op> },
    FetchStorage,
    UpdatePresence { data: Map<String, Value> },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Full storage snapshot as `[id, node]` pairs.
    InitialStorageState { items: Vec<(NodeId, SerializedNode)> },
    /// Incremental, server-ordered operations.
    UpdateStorage { ops: Vec<Op> },
}
