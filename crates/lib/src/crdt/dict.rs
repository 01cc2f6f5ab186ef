//! Dictionary node: dynamic string keys, every value a child node.
//!
//! Setting a key replaces the whole entry; plain JSON is wrapped in a leaf. Conflicts
//! on a key use the same last-writer-wins rule as records.

use std::collections::{BTreeMap, HashMap};

use super::delta::{KeyUpdate, StorageUpdate};
use super::errors::CrdtError;
use super::op::{CreateOp, NodeId, NodeType, Op, OpId};
use super::pool::{ApplyResult, LocalChange, NodePool, OpSource};
use super::value::LiveValue;

#[derive(Debug, Clone, Default)]
pub struct DictNode {
    entries: BTreeMap<String, NodeId>,
    unacknowledged_sets: HashMap<String, OpId>,
}

impl DictNode {
    pub fn get(&self, key: &str) -> Option<&NodeId> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &NodeId)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_set(&self, key: &str) -> Option<&str> {
        self.unacknowledged_sets.get(key).map(String::as_str)
    }

    pub(crate) fn insert_entry(&mut self, key: String, child: NodeId) -> Option<NodeId> {
        self.entries.insert(key, child)
    }

    pub(crate) fn release_pending(&mut self, op_id: &str) {
        self.unacknowledged_sets.retain(|_, pending| pending != op_id);
    }
}

pub(crate) fn attach_child(
    pool: &mut NodePool,
    node_type: NodeType,
    op: &CreateOp,
    source: OpSource,
) -> Result<ApplyResult, CrdtError> {
    let id = op.parent_id.as_str();
    let key = op.parent_key.as_str();
    let op_id = op.op_id.as_deref();

    let dict = pool.dict_mut(id)?;
    let pending = dict.unacknowledged_sets.get(key).cloned();
    if pool.contains(&op.id) {
        if pending.is_some() && pending.as_deref() == op_id {
            pool.dict_mut(id)?.unacknowledged_sets.remove(key);
        }
        return Ok(ApplyResult::NotModified);
    }
    match (source, pending) {
        (OpSource::Replay, _) => {
            if let Some(op_id) = op_id {
                pool.dict_mut(id)?
                    .unacknowledged_sets
                    .insert(key.to_string(), op_id.to_string());
            }
        }
        (_, None) => {}
        (_, Some(pending)) => {
            if Some(pending.as_str()) == op_id {
                pool.dict_mut(id)?.unacknowledged_sets.remove(key);
            }
            return Ok(ApplyResult::NotModified);
        }
    }

    let previous = pool.dict_mut(id)?.entries.remove(key);
    let reverse = match previous {
        Some(old) => pool.detach(&old)?.to_ops(id),
        None => vec![Op::delete_node(op.id.clone())],
    };
    pool.create_from_op(node_type, op, key)?;
    pool.dict_mut(id)?
        .insert_entry(key.to_string(), op.id.clone());
    pool.invalidate(id);
    Ok(ApplyResult::Modified {
        update: StorageUpdate::dict(id, key, KeyUpdate::Update),
        reverse,
    })
}

pub(crate) fn detach_child(
    pool: &mut NodePool,
    id: &str,
    child_id: &str,
) -> Result<ApplyResult, CrdtError> {
    let dict = pool.dict_mut(id)?;
    let Some(key) = dict
        .entries
        .iter()
        .find(|(_, child)| child.as_str() == child_id)
        .map(|(key, _)| key.clone())
    else {
        return Ok(ApplyResult::NotModified);
    };
    dict.entries.remove(&key);
    let reverse = pool.detach(child_id)?.to_ops(id);
    pool.invalidate(id);
    Ok(ApplyResult::Modified {
        update: StorageUpdate::dict(id, key, KeyUpdate::Delete),
        reverse,
    })
}

/// Local `set`: replaces the entry at `key`.
pub(crate) fn set(
    pool: &mut NodePool,
    id: &str,
    key: &str,
    value: &LiveValue,
) -> Result<LocalChange, CrdtError> {
    let previous = pool.dict_mut(id)?.entries.remove(key);
    let previous = previous.map(|old| pool.detach(&old)).transpose()?;

    let child = pool.attach_value(value, id, key)?;
    let mut ops = pool.create_ops(&child)?;
    pool.assign_op_ids(&mut ops)?;

    let dict = pool.dict_mut(id)?;
    dict.insert_entry(key.to_string(), child.clone());
    if let Some(op_id) = ops.first().and_then(Op::op_id) {
        dict.unacknowledged_sets
            .insert(key.to_string(), op_id.to_string());
    }
    pool.invalidate(id);

    let reverse = match previous {
        Some(tree) => tree.to_ops(id),
        None => vec![Op::delete_node(child)],
    };
    Ok(LocalChange {
        ops,
        reverse,
        update: StorageUpdate::dict(id, key, KeyUpdate::Update),
    })
}

/// Local `delete`. Returns `None` when the key is absent.
pub(crate) fn delete(
    pool: &mut NodePool,
    id: &str,
    key: &str,
) -> Result<Option<LocalChange>, CrdtError> {
    let Some(child) = pool.dict_mut(id)?.entries.remove(key) else {
        return Ok(None);
    };
    let reverse = pool.detach(&child)?.to_ops(id);
    let op = Op::DeleteNode {
        id: child,
        op_id: Some(pool.generate_op_id()?),
    };
    pool.invalidate(id);
    Ok(Some(LocalChange {
        ops: vec![op],
        reverse,
        update: StorageUpdate::dict(id, key, KeyUpdate::Delete),
    }))
}
