//! Error types for tree operations.
//!
//! These are contract errors: misuse of the node API by the caller, or inbound data
//! that cannot be interpreted. Conflicts between concurrent writers are never errors;
//! they resolve to "not modified" or an altered delta.

use thiserror::Error;

use super::op::NodeId;

/// Structured error types for tree operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CrdtError {
    /// No node with this id is attached to the pool
    #[error("Node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// The node exists but is of a different kind than the operation requires
    #[error("Node {id} type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        id: NodeId,
        expected: &'static str,
        actual: &'static str,
    },

    /// A node with this id is already attached
    #[error("Node already attached: {id}")]
    AlreadyAttached { id: NodeId },

    /// List index outside of the valid range
    #[error("Index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Two positions compared equal where a strict order is required
    #[error("Cannot compare position {position:?} with itself")]
    EqualPositions { position: String },

    /// `before` does not sort strictly before `after`
    #[error("Cannot generate a position between {before:?} and {after:?}")]
    PositionOutOfOrder { before: String, after: String },

    /// Position string is empty or uses characters outside the alphabet
    #[error("Invalid position {position:?}: {reason}")]
    InvalidPosition { position: String, reason: String },

    /// Serialization was requested for a node that is not attached
    #[error("Cannot serialize detached node {id}")]
    DetachedNode { id: NodeId },

    /// A replace-intent operation that cannot be interpreted
    #[error("Malformed replace operation: {reason}")]
    MalformedReplace { reason: String },

    /// The parent of an operation cannot hold children at this key
    #[error("Invalid parent {id}: {reason}")]
    InvalidParent { id: NodeId, reason: String },

    /// A storage snapshot could not be turned into a tree
    #[error("Invalid storage snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    /// Ids were requested before the connection assigned an actor
    #[error("No actor assigned; ids cannot be generated before connecting")]
    NoActor,
}

impl CrdtError {
    /// Check if this error indicates a missing node
    pub fn is_not_found(&self) -> bool {
        matches!(self, CrdtError::NodeNotFound { .. })
    }

    /// Check if this error is related to a node kind mismatch
    pub fn is_type_error(&self) -> bool {
        matches!(self, CrdtError::TypeMismatch { .. })
    }

    /// Check if this error is related to position generation or parsing
    pub fn is_position_error(&self) -> bool {
        matches!(
            self,
            CrdtError::EqualPositions { .. }
                | CrdtError::PositionOutOfOrder { .. }
                | CrdtError::InvalidPosition { .. }
        )
    }

    /// Check if this error is a violated API contract
    pub fn is_contract_error(&self) -> bool {
        !matches!(
            self,
            CrdtError::NodeNotFound { .. } | CrdtError::InvalidSnapshot { .. }
        )
    }

    /// Get the node id if this error refers to a specific node
    pub fn node_id(&self) -> Option<&str> {
        match self {
            CrdtError::NodeNotFound { id }
            | CrdtError::TypeMismatch { id, .. }
            | CrdtError::AlreadyAttached { id }
            | CrdtError::DetachedNode { id }
            | CrdtError::InvalidParent { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl From<CrdtError> for crate::Error {
    fn from(err: CrdtError) -> Self {
        crate::Error::Crdt(err)
    }
}
