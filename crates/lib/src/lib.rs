//!
//! livetree: a replicated document tree kept in sync through a single ordering server.
//!
//! Local mutations apply immediately and optimistically. Every client converges
//! once the server has sequenced and rebroadcast the operations.
//!
//! ## Core Concepts
//!
//! * **Nodes (`crdt::Node`)**: records, dictionaries, ordered lists and leaf values,
//!   stored in an arena (`crdt::NodePool`) keyed by `actor:counter` ids.
//! * **Operations (`crdt::Op`)**: the wire unit of change. Every local mutation produces
//!   forward operations for the server and reverse operations for the undo stack.
//! * **Positions (`crdt::Position`)**: fractional-index strings that order list children.
//! * **Document (`sync::Document`)**: the synchronizer. Owns the node pool, the outbound
//!   buffer, unacknowledged operations, undo/redo stacks and batching.
//! * **Room (`room::Room`)**: an async driver that connects a `Document` to a
//!   [`room::Transport`] and flushes outbound operations on a throttle.
//! * **Origins (`crdt::OpSource`)**: every inbound operation is tagged REMOTE, ACK or
//!   REPLAY so each node type can pick the right conflict policy.

pub mod clock;
pub mod constants;
pub mod crdt;
pub mod room;
pub mod sync;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use crdt::{LiveValue, NodeId, Op, OpId, Position};
pub use sync::{Document, DocumentConfig};

/// Result type used throughout the livetree library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the livetree library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured tree errors from the crdt module
    #[error(transparent)]
    Crdt(crdt::CrdtError),

    /// Structured synchronizer errors from the sync module
    #[error(transparent)]
    Sync(sync::SyncError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Crdt(_) => "crdt",
            Error::Sync(_) => "sync",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a node or other resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Crdt(crdt_err) => crdt_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is a violated API contract (misuse by the caller).
    pub fn is_contract_error(&self) -> bool {
        match self {
            Error::Crdt(crdt_err) => crdt_err.is_contract_error(),
            Error::Sync(sync_err) => sync_err.is_contract_error(),
            Error::Serialize(_) => false,
        }
    }

    /// Check if this error is CRDT-related.
    pub fn is_crdt_error(&self) -> bool {
        matches!(self, Error::Crdt(_))
    }

    /// Check if this error is synchronizer-related.
    pub fn is_sync_error(&self) -> bool {
        matches!(self, Error::Sync(_))
    }

    /// Check if this error came from the transport layer.
    pub fn is_transport_error(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_transport_error(),
            _ => false,
        }
    }
}
