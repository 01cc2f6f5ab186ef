//! Record node: fixed-shape key/value map with per-key last-writer-wins.
//!
//! Plain JSON fields are stored inline and travel in `UpdateRecord`. Nested nodes are
//! children created by their own create operations.
//!
//! Per key, the record remembers the op id of the latest unacknowledged local write.
//! An inbound write on that key is our own echo when the op ids match and a losing
//! race otherwise; either way it leaves the local value alone.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use super::delta::{KeyUpdate, StorageUpdate};
use super::errors::CrdtError;
use super::op::{CreateOp, NodeId, NodeType, Op, OpId};
use super::pool::{ApplyResult, LocalChange, NodePool, OpSource};
use super::value::LiveValue;

/// A record field: inline JSON or a child node.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(Value),
    Node(NodeId),
}

#[derive(Debug, Clone, Default)]
pub struct RecordNode {
    fields: BTreeMap<String, Field>,
    last_local_update: HashMap<String, OpId>,
}

impl RecordNode {
    pub(crate) fn from_data(data: &Value) -> Self {
        let fields = match data {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), Field::Value(v.clone())))
                .collect(),
            _ => BTreeMap::new(),
        };
        Self {
            fields,
            last_local_update: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Inline JSON fields only, as carried by `CreateRecord` and `UpdateRecord`.
    pub fn data(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|(k, f)| match f {
                Field::Value(v) => Some((k.clone(), v.clone())),
                Field::Node(_) => None,
            })
            .collect()
    }

    pub fn child_nodes(&self) -> impl Iterator<Item = (&String, &NodeId)> {
        self.fields.iter().filter_map(|(k, f)| match f {
            Field::Node(id) => Some((k, id)),
            Field::Value(_) => None,
        })
    }

    /// Op id of the unacknowledged local write on `key`, if any.
    pub fn pending_write(&self, key: &str) -> Option<&str> {
        self.last_local_update.get(key).map(String::as_str)
    }

    pub(crate) fn insert_field(&mut self, key: String, field: Field) -> Option<Field> {
        self.fields.insert(key, field)
    }

    /// Forgets pending writes made by `op_id`.
    pub(crate) fn release_pending(&mut self, op_id: &str) {
        self.last_local_update.retain(|_, pending| pending != op_id);
    }
}

/// Decides whether an inbound write on `key` may touch the local value.
///
/// Replayed writes become the pending write. Remote and acknowledged writes are
/// dropped while a local write is pending; a matching op id clears the marker.
fn accept_write(record: &mut RecordNode, key: &str, op_id: Option<&str>, source: OpSource) -> bool {
    if source == OpSource::Replay {
        if let Some(op_id) = op_id {
            record
                .last_local_update
                .insert(key.to_string(), op_id.to_string());
        }
        return true;
    }
    match record.last_local_update.get(key).cloned() {
        None => true,
        Some(pending) => {
            if Some(pending.as_str()) == op_id {
                record.last_local_update.remove(key);
            }
            false
        }
    }
}

/// Removes the field at `key`, returning operations that restore it.
fn take_field(pool: &mut NodePool, id: &str, key: &str) -> Result<Vec<Op>, CrdtError> {
    let previous = pool.record_mut(id)?.fields.remove(key);
    restore_ops(pool, id, key, previous)
}

fn restore_ops(
    pool: &mut NodePool,
    id: &str,
    key: &str,
    previous: Option<Field>,
) -> Result<Vec<Op>, CrdtError> {
    Ok(match previous {
        Some(Field::Node(child)) => pool.detach(&child)?.to_ops(id),
        Some(Field::Value(value)) => vec![Op::UpdateRecord {
            id: id.to_string(),
            op_id: None,
            data: Map::from_iter([(key.to_string(), value)]),
        }],
        None => vec![Op::DeleteKey {
            id: id.to_string(),
            op_id: None,
            key: key.to_string(),
        }],
    })
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

    if pool.contains(&op.id) {
        let record = pool.record_mut(id)?;
        if op_id.is_some() && record.pending_write(key) == op_id {
            record.last_local_update.remove(key);
        }
        return Ok(ApplyResult::NotModified);
    }
    if !accept_write(pool.record_mut(id)?, key, op_id, source) {
        return Ok(ApplyResult::NotModified);
    }

    let reverse = take_field(pool, id, key)?;
    pool.create_from_op(node_type, op, key)?;
    pool.record_mut(id)?
        .insert_field(key.to_string(), Field::Node(op.id.clone()));
    pool.invalidate(id);
    Ok(ApplyResult::Modified {
        update: StorageUpdate::record(id, key, KeyUpdate::Update),
        reverse,
    })
}

pub(crate) fn apply_update(
    pool: &mut NodePool,
    id: &str,
    op_id: Option<&str>,
    data: &Map<String, Value>,
    source: OpSource,
) -> Result<ApplyResult, CrdtError> {
    let mut reverse = Vec::new();
    let mut reverse_data = Map::new();
    let mut updates = BTreeMap::new();

    for (key, value) in data {
        if !accept_write(pool.record_mut(id)?, key, op_id, source) {
            continue;
        }
        let previous = pool
            .record_mut(id)?
            .insert_field(key.clone(), Field::Value(value.clone()));
        match previous {
            Some(Field::Value(old)) => {
                reverse_data.insert(key.clone(), old);
            }
            other => reverse.extend(restore_ops(pool, id, key, other)?),
        }
        updates.insert(key.clone(), KeyUpdate::Update);
    }

    if updates.is_empty() {
        return Ok(ApplyResult::NotModified);
    }
    pool.invalidate(id);
    if !reverse_data.is_empty() {
        reverse.insert(
            0,
            Op::UpdateRecord {
                id: id.to_string(),
                op_id: None,
                data: reverse_data,
            },
        );
    }
    Ok(ApplyResult::Modified {
        update: StorageUpdate::Record {
            node: id.to_string(),
            updates,
        },
        reverse,
    })
}

pub(crate) fn apply_delete_key(
    pool: &mut NodePool,
    id: &str,
    key: &str,
    source: OpSource,
) -> Result<ApplyResult, CrdtError> {
    let record = pool.record(id)?;
    if record.get(key).is_none() {
        return Ok(ApplyResult::NotModified);
    }
    if source != OpSource::Replay && record.pending_write(key).is_some() {
        return Ok(ApplyResult::NotModified);
    }
    let reverse = take_field(pool, id, key)?;
    pool.invalidate(id);
    Ok(ApplyResult::Modified {
        update: StorageUpdate::record(id, key, KeyUpdate::Delete),
        reverse,
    })
}

pub(crate) fn detach_child(
    pool: &mut NodePool,
    id: &str,
    child_id: &str,
) -> Result<ApplyResult, CrdtError> {
    let Some(key) = pool
        .record(id)?
        .child_nodes()
        .find(|(_, child)| child.as_str() == child_id)
        .map(|(key, _)| key.clone())
    else {
        return Ok(ApplyResult::NotModified);
    };
    let reverse = take_field(pool, id, &key)?;
    pool.invalidate(id);
    Ok(ApplyResult::Modified {
        update: StorageUpdate::record(id, key, KeyUpdate::Delete),
        reverse,
    })
}

/// Local `update`: writes every key of `patch` and marks each as pending.
pub(crate) fn update(
    pool: &mut NodePool,
    id: &str,
    patch: BTreeMap<String, LiveValue>,
) -> Result<LocalChange, CrdtError> {
    pool.record(id)?;
    // Only plain values travel in the `UpdateRecord`; nested children carry their own ids.
    let mut update_op_id: Option<OpId> = None;
    let mut ops = Vec::new();
    let mut reverse = Vec::new();
    let mut reverse_data = Map::new();
    let mut data = Map::new();
    let mut updates = BTreeMap::new();

    for (key, value) in patch {
        let previous = pool.record_mut(id)?.fields.remove(&key);
        match previous {
            Some(Field::Value(old)) => {
                reverse_data.insert(key.clone(), old);
            }
            other => reverse.extend(restore_ops(pool, id, &key, other)?),
        }

        let (field, pending) = match value {
            LiveValue::Json(json) => {
                let pending = match &update_op_id {
                    Some(op_id) => op_id.clone(),
                    None => {
                        let op_id = pool.generate_op_id()?;
                        update_op_id = Some(op_id.clone());
                        op_id
                    }
                };
                data.insert(key.clone(), json.clone());
                (Field::Value(json), pending)
            }
            nested => {
                let child = pool.attach_value(&nested, id, &key)?;
                let mut child_ops = pool.create_ops(&child)?;
                pool.assign_op_ids(&mut child_ops)?;
                let pending = match child_ops.first().and_then(Op::op_id) {
                    Some(op_id) => op_id.to_string(),
                    None => pool.generate_op_id()?,
                };
                ops.extend(child_ops);
                (Field::Node(child), pending)
            }
        };
        let record = pool.record_mut(id)?;
        record.insert_field(key.clone(), field);
        record.last_local_update.insert(key.clone(), pending);
        updates.insert(key, KeyUpdate::Update);
    }

    if !reverse_data.is_empty() {
        reverse.insert(
            0,
            Op::UpdateRecord {
                id: id.to_string(),
                op_id: None,
                data: reverse_data,
            },
        );
    }
    if !data.is_empty() {
        ops.insert(
            0,
            Op::UpdateRecord {
                id: id.to_string(),
                op_id: update_op_id,
                data,
            },
        );
    }
    pool.invalidate(id);
    Ok(LocalChange {
        ops,
        reverse,
        update: StorageUpdate::Record {
            node: id.to_string(),
            updates,
        },
    })
}

/// Local `delete`. Returns `None` when the key is absent.
pub(crate) fn delete(
    pool: &mut NodePool,
    id: &str,
    key: &str,
) -> Result<Option<LocalChange>, CrdtError> {
    if pool.record(id)?.get(key).is_none() {
        return Ok(None);
    }
    let reverse = take_field(pool, id, key)?;
    let op = Op::DeleteKey {
        id: id.to_string(),
        op_id: Some(pool.generate_op_id()?),
        key: key.to_string(),
    };
    pool.invalidate(id);
    Ok(Some(LocalChange {
        ops: vec![op],
        reverse,
        update: StorageUpdate::record(id, key, KeyUpdate::Delete),
    }))
}
