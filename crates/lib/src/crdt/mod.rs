//! The replicated tree: nodes, operations, positions and update deltas.
//!
//! # Core Types
//!
//! - [`NodePool`] - arena of attached nodes keyed by id, with id generators
//! - [`Node`] - a record, dictionary, list or leaf with its [`ParentLink`]
//! - [`Op`] - the wire unit of change
//! - [`Position`] - fractional-index key ordering list children
//! - [`StorageUpdate`] - per-node change report for subscribers
//! - [`LiveValue`] - detached subtree handed to local mutations
//!
//! Every inbound operation is applied through [`NodePool`] with an [`OpSource`], which
//! selects the conflict policy of the node it lands on.

pub mod delta;
pub mod dict;
pub mod errors;
pub mod leaf;
pub mod list;
pub mod node;
pub mod op;
pub mod pool;
pub mod position;
pub mod record;
pub mod value;

pub use delta::{KeyUpdate, ListUpdate, StorageUpdate, UpdateSet};
pub use dict::DictNode;
pub use errors::CrdtError;
pub use leaf::LeafNode;
pub use list::{ListItem, ListNode};
pub use node::{DetachedTree, Node, NodeKind, ParentLink};
pub use op::{CreateOp, Intent, NodeId, NodeType, Op, OpId, SerializedNode};
pub use pool::{ApplyResult, LocalChange, NodePool, OpSource};
pub use position::{Position, compare_positions, make_position};
pub use record::{Field, RecordNode};
pub use value::LiveValue;
