//! Update deltas reported to subscribers.
//!
//! List entries are always derived from before/after indices of the re-sorted
//! children, independent of which apply path produced them.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::op::NodeId;

/// Change of a single record or dictionary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyUpdate {
    Update,
    Delete,
}

/// One entry of a list delta. `item` is the immutable projection of the child.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ListUpdate {
    Insert {
        index: usize,
        item: Value,
    },
    Delete {
        index: usize,
    },
    Move {
        index: usize,
        previous_index: usize,
        item: Value,
    },
    Replace {
        index: usize,
        item: Value,
    },
}

/// Per-node change report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StorageUpdate {
    Record {
        node: NodeId,
        updates: BTreeMap<String, KeyUpdate>,
    },
    Dict {
        node: NodeId,
        updates: BTreeMap<String, KeyUpdate>,
    },
    List {
        node: NodeId,
        updates: Vec<ListUpdate>,
    },
}

impl StorageUpdate {
    pub fn record(node: impl Into<NodeId>, key: impl Into<String>, update: KeyUpdate) -> Self {
        StorageUpdate::Record {
            node: node.into(),
            updates: BTreeMap::from([(key.into(), update)]),
        }
    }

    pub fn dict(node: impl Into<NodeId>, key: impl Into<String>, update: KeyUpdate) -> Self {
        StorageUpdate::Dict {
            node: node.into(),
            updates: BTreeMap::from([(key.into(), update)]),
        }
    }

    pub fn list(node: impl Into<NodeId>, updates: Vec<ListUpdate>) -> Self {
        StorageUpdate::List {
            node: node.into(),
            updates,
        }
    }

    pub fn node(&self) -> &str {
        match self {
            StorageUpdate::Record { node, .. }
            | StorageUpdate::Dict { node, .. }
            | StorageUpdate::List { node, .. } => node,
        }
    }

    /// Folds a later update for the same node into this one.
    ///
    /// Key maps are overwritten key by key, list entries are appended. An update of a
    /// different shape replaces this one.
    pub fn merge(&mut self, later: StorageUpdate) {
        match (self, later) {
            (
                StorageUpdate::Record { updates, .. },
                StorageUpdate::Record {
                    updates: later_updates,
                    ..
                },
            )
            | (
                StorageUpdate::Dict { updates, .. },
                StorageUpdate::Dict {
                    updates: later_updates,
                    ..
                },
            ) => updates.extend(later_updates),
            (
                StorageUpdate::List { updates, .. },
                StorageUpdate::List {
                    updates: later_updates,
                    ..
                },
            ) => updates.extend(later_updates),
            (this, later) => *this = later,
        }
    }
}

/// Updates keyed by node, in first-touched order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet(IndexMap<NodeId, StorageUpdate>);

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, update: StorageUpdate) {
        match self.0.get_mut(update.node()) {
            Some(existing) => existing.merge(update),
            None => {
                self.0.insert(update.node().to_string(), update);
            }
        }
    }

    pub fn extend(&mut self, other: UpdateSet) {
        for update in other.0.into_values() {
            self.add(update);
        }
    }

    pub fn get(&self, node: &str) -> Option<&StorageUpdate> {
        self.0.get(node)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_vec(self) -> Vec<StorageUpdate> {
        self.0.into_values().collect()
    }
}
