//! Ordered-list node.
//!
//! Children are kept sorted by [`Position`], the only source of order. A create
//! operation is either a plain insert or a replace (`intent: "replace"` with a
//! `replacedId`), and each shape has its own path per [`OpSource`]:
//!
//! | | plain insert | replace |
//! |---|---|---|
//! | Remote | shift the occupant, insert | swap the occupant, detach `replacedId` |
//! | Ack | no-op, move, or materialize | confirm, move, or resurrect |
//! | Replay | recreate, guarding duplicates | swap with reverse, set pending marker |
//!
//! A child evicted by a racing replace is not deleted but kept in the
//! implicitly-deleted set, so its own delayed ack or an undo can bring it back.
//!
//! Deltas are derived from before/after indices in the re-sorted items, never from
//! the operation itself.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use super::delta::{ListUpdate, StorageUpdate};
use super::errors::CrdtError;
use super::op::{CreateOp, Intent, NodeId, NodeType, Op, OpId};
use super::pool::{ApplyResult, LocalChange, NodePool, OpSource};
use super::position::{Position, make_position};
use super::value::LiveValue;

/// A child id with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub id: NodeId,
    pub position: Position,
}

#[derive(Debug, Clone, Default)]
pub struct ListNode {
    items: Vec<ListItem>,
    implicitly_deleted: HashSet<NodeId>,
    unacknowledged_sets: HashMap<Position, OpId>,
}

impl ListNode {
    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&ListItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index_of_position(&self, position: &Position) -> Option<usize> {
        self.items.iter().position(|item| &item.position == position)
    }

    pub fn index_of_id(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn implicitly_deleted(&self) -> impl Iterator<Item = &NodeId> {
        self.implicitly_deleted.iter()
    }

    pub fn is_implicitly_deleted(&self, id: &str) -> bool {
        self.implicitly_deleted.contains(id)
    }

    pub fn pending_set(&self, position: &Position) -> Option<&str> {
        self.unacknowledged_sets.get(position).map(String::as_str)
    }

    pub(crate) fn push_sorted(&mut self, id: NodeId, position: Position) -> usize {
        self.items.push(ListItem {
            id: id.clone(),
            position,
        });
        self.sort();
        self.index_of_id(&id).unwrap_or_default()
    }

    pub(crate) fn release_pending(&mut self, op_id: &str) {
        self.unacknowledged_sets.retain(|_, pending| pending != op_id);
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| a.position.cmp(&b.position));
    }

    fn position_after(&self, index: usize) -> Option<Position> {
        self.items.get(index + 1).map(|item| item.position.clone())
    }
}

fn item(pool: &NodePool, id: &str) -> serde_json::Value {
    pool.to_json(id)
}

fn out_of_bounds(index: usize, len: usize) -> CrdtError {
    CrdtError::IndexOutOfBounds { index, len }
}

/// Marks the first create op as replacing `replaced_id`.
fn with_replace_intent(mut ops: Vec<Op>, replaced_id: &str) -> Vec<Op> {
    if let Some(create) = ops.first_mut().and_then(Op::as_create_mut) {
        create.intent = Some(Intent::Replace);
        create.replaced_id = Some(replaced_id.to_string());
    }
    ops
}

/// Inserts an existing arena node into the items at `position`. Returns its index.
fn insert_sorted(
    pool: &mut NodePool,
    list_id: &str,
    child_id: &str,
    position: Position,
) -> Result<usize, CrdtError> {
    pool.set_parent_key(child_id, position.as_str())?;
    Ok(pool
        .list_mut(list_id)?
        .push_sorted(child_id.to_string(), position))
}

/// Gives the child a new position and re-sorts. Returns its new index.
fn reposition(
    pool: &mut NodePool,
    list_id: &str,
    child_id: &str,
    position: Position,
) -> Result<usize, CrdtError> {
    pool.set_parent_key(child_id, position.as_str())?;
    let list = pool.list_mut(list_id)?;
    if let Some(entry) = list.items.iter_mut().find(|item| item.id == child_id) {
        entry.position = position;
    }
    list.sort();
    list.index_of_id(child_id).ok_or_else(|| CrdtError::NodeNotFound {
        id: child_id.to_string(),
    })
}

/// Moves the occupant at `index` (sitting at `key`) to an interim position just after
/// it, pending a corrective reposition from the server.
fn shift_item(
    pool: &mut NodePool,
    list_id: &str,
    index: usize,
    key: &Position,
) -> Result<(), CrdtError> {
    let list = pool.list(list_id)?;
    let next = list.position_after(index);
    let Some(occupant) = list.get(index).map(|item| item.id.clone()) else {
        return Ok(());
    };
    let shifted = make_position(Some(key), next.as_ref())?;
    trace!(list = list_id, id = %occupant, to = %shifted, "Shifting list occupant");
    reposition(pool, list_id, &occupant, shifted)?;
    Ok(())
}

/// Puts `child_id` in the slot at `index`, evicting the occupant into the
/// implicitly-deleted set. Returns the evicted id.
fn swap_into_slot(
    pool: &mut NodePool,
    list_id: &str,
    index: usize,
    child_id: &str,
    evict: bool,
) -> Result<NodeId, CrdtError> {
    let list = pool.list_mut(list_id)?;
    let len = list.items.len();
    let slot = list.items.get_mut(index).ok_or(out_of_bounds(index, len))?;
    let previous = std::mem::replace(&mut slot.id, child_id.to_string());
    let position = slot.position.clone();
    if evict {
        list.implicitly_deleted.insert(previous.clone());
    }
    pool.set_parent_key(child_id, position.as_str())?;
    Ok(previous)
}

/// Detaches the node named by a replace operation, if it is still one of our children.
///
/// Implicitly deleted children are dropped without a delta.
fn detach_replaced(
    pool: &mut NodePool,
    list_id: &str,
    replaced_id: &str,
) -> Result<Option<(ListUpdate, Vec<Op>)>, CrdtError> {
    let belongs = pool
        .get(replaced_id)
        .is_some_and(|node| node.parent().parent() == Some(list_id));
    if !belongs {
        return Ok(None);
    }
    match detach_child(pool, list_id, replaced_id)? {
        ApplyResult::Modified {
            update: StorageUpdate::List { mut updates, .. },
            reverse,
        } if !updates.is_empty() => Ok(Some((updates.remove(0), reverse))),
        _ => Ok(None),
    }
}

pub(crate) fn detach_child(
    pool: &mut NodePool,
    list_id: &str,
    child_id: &str,
) -> Result<ApplyResult, CrdtError> {
    let list = pool.list_mut(list_id)?;
    match list.index_of_id(child_id) {
        Some(index) => {
            list.items.remove(index);
            let tree = pool.detach(child_id)?;
            pool.invalidate(list_id);
            Ok(ApplyResult::list(
                list_id,
                vec![ListUpdate::Delete { index }],
                tree.to_ops(list_id),
            ))
        }
        None => {
            if list.implicitly_deleted.remove(child_id) {
                pool.detach(child_id)?;
            }
            Ok(ApplyResult::NotModified)
        }
    }
}

pub(crate) fn attach_child(
    pool: &mut NodePool,
    node_type: NodeType,
    op: &CreateOp,
    source: OpSource,
) -> Result<ApplyResult, CrdtError> {
    let list_id = op.parent_id.as_str();
    let key = Position::parse(op.parent_key.as_str())?;
    let result = if op.is_replace() {
        let replaced_id = op
            .replaced_id
            .as_deref()
            .ok_or_else(|| CrdtError::MalformedReplace {
                reason: format!("create {} has replace intent but no replacedId", op.id),
            })?;
        trace!(list = list_id, id = %op.id, ?source, "List replace");
        match source {
            OpSource::Remote => set_remote(pool, list_id, node_type, op, key, replaced_id)?,
            OpSource::Ack => set_ack(pool, list_id, node_type, op, key, replaced_id)?,
            OpSource::Replay => set_replay(pool, list_id, node_type, op, key, replaced_id)?,
        }
    } else {
        trace!(list = list_id, id = %op.id, ?source, "List insert");
        match source {
            OpSource::Remote => insert_remote(pool, list_id, node_type, op, key)?,
            OpSource::Ack => insert_ack(pool, list_id, node_type, op, key)?,
            OpSource::Replay => insert_replay(pool, list_id, node_type, op, key)?,
        }
    };
    pool.invalidate(list_id);
    Ok(result)
}

fn insert_remote(
    pool: &mut NodePool,
    list_id: &str,
    node_type: NodeType,
    op: &CreateOp,
    key: Position,
) -> Result<ApplyResult, CrdtError> {
    if pool.contains(&op.id) {
        return Ok(ApplyResult::NotModified);
    }
    if let Some(occupant) = pool.list(list_id)?.index_of_position(&key) {
        shift_item(pool, list_id, occupant, &key)?;
    }
    pool.create_from_op(node_type, op, key.as_str())?;
    let index = insert_sorted(pool, list_id, &op.id, key)?;
    Ok(ApplyResult::list(
        list_id,
        vec![ListUpdate::Insert {
            index,
            item: item(pool, &op.id),
        }],
        Vec::new(),
    ))
}

fn insert_ack(
    pool: &mut NodePool,
    list_id: &str,
    node_type: NodeType,
    op: &CreateOp,
    key: Position,
) -> Result<ApplyResult, CrdtError> {
    let pending = pool.list(list_id)?.pending_set(&key).map(str::to_string);
    if let Some(pending) = pending {
        if Some(pending.as_str()) != op.op_id.as_deref() {
            return Ok(ApplyResult::NotModified);
        }
        pool.list_mut(list_id)?.unacknowledged_sets.remove(&key);
    }

    let list = pool.list(list_id)?;
    let occupant = list.index_of_position(&key);
    if let Some(previous_index) = list.index_of_id(&op.id) {
        if list.items[previous_index].position == key {
            return Ok(ApplyResult::NotModified);
        }
        if let Some(occupant) = occupant {
            shift_item(pool, list_id, occupant, &key)?;
        }
        let index = reposition(pool, list_id, &op.id, key)?;
        if index == previous_index {
            return Ok(ApplyResult::NotModified);
        }
        return Ok(ApplyResult::list(
            list_id,
            vec![ListUpdate::Move {
                index,
                previous_index,
                item: item(pool, &op.id),
            }],
            Vec::new(),
        ));
    }

    let resurrect = list.is_implicitly_deleted(&op.id) && pool.contains(&op.id);
    if !resurrect && pool.contains(&op.id) {
        return Ok(ApplyResult::NotModified);
    }
    if let Some(occupant) = occupant {
        shift_item(pool, list_id, occupant, &key)?;
    }
    if resurrect {
        pool.list_mut(list_id)?.implicitly_deleted.remove(&op.id);
    } else {
        pool.create_from_op(node_type, op, key.as_str())?;
    }
    let index = insert_sorted(pool, list_id, &op.id, key)?;
    Ok(ApplyResult::list(
        list_id,
        vec![ListUpdate::Insert {
            index,
            item: item(pool, &op.id),
        }],
        Vec::new(),
    ))
}

fn insert_replay(
    pool: &mut NodePool,
    list_id: &str,
    node_type: NodeType,
    op: &CreateOp,
    key: Position,
) -> Result<ApplyResult, CrdtError> {
    if pool.contains(&op.id) {
        return Ok(ApplyResult::NotModified);
    }
    let list = pool.list(list_id)?;
    let key = match list.index_of_position(&key) {
        Some(occupant) => make_position(Some(&key), list.position_after(occupant).as_ref())?,
        None => key,
    };
    pool.create_from_op(node_type, op, key.as_str())?;
    let index = insert_sorted(pool, list_id, &op.id, key)?;
    Ok(ApplyResult::list(
        list_id,
        vec![ListUpdate::Insert {
            index,
            item: item(pool, &op.id),
        }],
        vec![Op::delete_node(op.id.clone())],
    ))
}

fn set_remote(
    pool: &mut NodePool,
    list_id: &str,
    node_type: NodeType,
    op: &CreateOp,
    key: Position,
    replaced_id: &str,
) -> Result<ApplyResult, CrdtError> {
    if pool.contains(&op.id) {
        return Ok(ApplyResult::NotModified);
    }
    let mut updates = Vec::new();
    match pool.list(list_id)?.index_of_position(&key) {
        Some(index) => {
            pool.create_from_op(node_type, op, key.as_str())?;
            let occupant = pool.list(list_id)?.items[index].id.clone();
            let named = occupant == replaced_id;
            swap_into_slot(pool, list_id, index, &op.id, !named)?;
            if named {
                pool.detach(&occupant)?;
            }
            updates.push(ListUpdate::Replace {
                index,
                item: item(pool, &op.id),
            });
            if !named {
                if let Some((delete, _)) = detach_replaced(pool, list_id, replaced_id)? {
                    updates.push(delete);
                }
            }
        }
        None => {
            if let Some((delete, _)) = detach_replaced(pool, list_id, replaced_id)? {
                updates.push(delete);
            }
            pool.create_from_op(node_type, op, key.as_str())?;
            let index = insert_sorted(pool, list_id, &op.id, key)?;
            updates.push(ListUpdate::Insert {
                index,
                item: item(pool, &op.id),
            });
        }
    }
    Ok(ApplyResult::list(list_id, updates, Vec::new()))
}

fn set_ack(
    pool: &mut NodePool,
    list_id: &str,
    node_type: NodeType,
    op: &CreateOp,
    key: Position,
    replaced_id: &str,
) -> Result<ApplyResult, CrdtError> {
    let mut updates = Vec::new();
    if let Some((delete, _)) = detach_replaced(pool, list_id, replaced_id)? {
        updates.push(delete);
    }

    let pending = pool.list(list_id)?.pending_set(&key).map(str::to_string);
    if let Some(pending) = pending {
        if Some(pending.as_str()) != op.op_id.as_deref() {
            return Ok(ApplyResult::list(list_id, updates, Vec::new()));
        }
        pool.list_mut(list_id)?.unacknowledged_sets.remove(&key);
    }

    let list = pool.list(list_id)?;
    let occupant = list.index_of_position(&key);
    if let Some(mut previous_index) = list.index_of_id(&op.id) {
        if list.items[previous_index].position == key {
            return Ok(ApplyResult::list(list_id, updates, Vec::new()));
        }
        if let Some(occupant) = occupant {
            let list = pool.list_mut(list_id)?;
            let evicted = list.items.remove(occupant);
            list.implicitly_deleted.insert(evicted.id);
            updates.push(ListUpdate::Delete { index: occupant });
            if occupant < previous_index {
                previous_index -= 1;
            }
        }
        let index = reposition(pool, list_id, &op.id, key)?;
        if index != previous_index {
            updates.push(ListUpdate::Move {
                index,
                previous_index,
                item: item(pool, &op.id),
            });
        }
        return Ok(ApplyResult::list(list_id, updates, Vec::new()));
    }

    let resurrect = list.is_implicitly_deleted(&op.id) && pool.contains(&op.id);
    if !resurrect && pool.contains(&op.id) {
        return Ok(ApplyResult::list(list_id, updates, Vec::new()));
    }
    if resurrect {
        pool.list_mut(list_id)?.implicitly_deleted.remove(&op.id);
    } else {
        pool.create_from_op(node_type, op, key.as_str())?;
    }
    match occupant {
        Some(index) => {
            swap_into_slot(pool, list_id, index, &op.id, true)?;
            updates.push(ListUpdate::Replace {
                index,
                item: item(pool, &op.id),
            });
        }
        None => {
            let index = insert_sorted(pool, list_id, &op.id, key)?;
            updates.push(ListUpdate::Insert {
                index,
                item: item(pool, &op.id),
            });
        }
    }
    Ok(ApplyResult::list(list_id, updates, Vec::new()))
}

fn set_replay(
    pool: &mut NodePool,
    list_id: &str,
    node_type: NodeType,
    op: &CreateOp,
    key: Position,
    replaced_id: &str,
) -> Result<ApplyResult, CrdtError> {
    if pool.contains(&op.id) {
        return Ok(ApplyResult::NotModified);
    }
    if let Some(op_id) = &op.op_id {
        pool.list_mut(list_id)?
            .unacknowledged_sets
            .insert(key.clone(), op_id.clone());
    }

    let mut updates = Vec::new();
    let mut reverse;
    match pool.list(list_id)?.index_of_position(&key) {
        Some(index) => {
            pool.create_from_op(node_type, op, key.as_str())?;
            let occupant = swap_into_slot(pool, list_id, index, &op.id, false)?;
            let tree = pool.detach(&occupant)?;
            reverse = with_replace_intent(tree.to_ops_at(list_id, key.as_str()), &op.id);
            updates.push(ListUpdate::Replace {
                index,
                item: item(pool, &op.id),
            });
            if occupant != replaced_id {
                if let Some((delete, restore)) = detach_replaced(pool, list_id, replaced_id)? {
                    updates.push(delete);
                    reverse.extend(restore);
                }
            }
        }
        None => {
            pool.create_from_op(node_type, op, key.as_str())?;
            let index = insert_sorted(pool, list_id, &op.id, key)?;
            updates.push(ListUpdate::Insert {
                index,
                item: item(pool, &op.id),
            });
            reverse = vec![Op::delete_node(op.id.clone())];
            if let Some((delete, restore)) = detach_replaced(pool, list_id, replaced_id)? {
                updates.push(delete);
                reverse.extend(restore);
            }
        }
    }
    Ok(ApplyResult::list(list_id, updates, reverse))
}

/// Applies a `SetParentKey` targeting one of our children.
pub(crate) fn set_child_key(
    pool: &mut NodePool,
    list_id: &str,
    child_id: &str,
    key: Position,
    source: OpSource,
) -> Result<ApplyResult, CrdtError> {
    let result = set_child_key_inner(pool, list_id, child_id, key, source)?;
    pool.invalidate(list_id);
    Ok(result)
}

fn set_child_key_inner(
    pool: &mut NodePool,
    list_id: &str,
    child_id: &str,
    key: Position,
    source: OpSource,
) -> Result<ApplyResult, CrdtError> {
    let list = pool.list(list_id)?;
    let occupant = list.index_of_position(&key);

    if list.is_implicitly_deleted(child_id) {
        pool.list_mut(list_id)?.implicitly_deleted.remove(child_id);
        if let Some(occupant) = occupant {
            shift_item(pool, list_id, occupant, &key)?;
        }
        let index = insert_sorted(pool, list_id, child_id, key)?;
        let reverse = match source {
            OpSource::Replay => vec![Op::delete_node(child_id)],
            _ => Vec::new(),
        };
        return Ok(ApplyResult::list(
            list_id,
            vec![ListUpdate::Insert {
                index,
                item: item(pool, child_id),
            }],
            reverse,
        ));
    }

    let Some(previous_index) = list.index_of_id(child_id) else {
        return Ok(ApplyResult::NotModified);
    };
    let previous_key = list.items[previous_index].position.clone();
    if previous_key == key {
        return Ok(ApplyResult::NotModified);
    }
    if let Some(occupant) = occupant {
        shift_item(pool, list_id, occupant, &key)?;
    }
    let index = reposition(pool, list_id, child_id, key)?;
    let reverse = match source {
        OpSource::Replay => vec![Op::SetParentKey {
            id: child_id.to_string(),
            op_id: None,
            parent_key: previous_key.to_string(),
        }],
        _ => Vec::new(),
    };
    let updates = if index == previous_index {
        Vec::new()
    } else {
        vec![ListUpdate::Move {
            index,
            previous_index,
            item: item(pool, child_id),
        }]
    };
    Ok(ApplyResult::list(list_id, updates, reverse))
}

/// Local `insert` at `index` (0..=len).
pub(crate) fn insert(
    pool: &mut NodePool,
    list_id: &str,
    index: usize,
    value: &LiveValue,
) -> Result<LocalChange, CrdtError> {
    let list = pool.list(list_id)?;
    if index > list.len() {
        return Err(out_of_bounds(index, list.len()));
    }
    let before = index
        .checked_sub(1)
        .and_then(|i| list.get(i))
        .map(|item| item.position.clone());
    let after = list.get(index).map(|item| item.position.clone());
    let position = make_position(before.as_ref(), after.as_ref())?;

    let child = pool.attach_value(value, list_id, position.as_str())?;
    let index = insert_sorted(pool, list_id, &child, position)?;
    let mut ops = pool.create_ops(&child)?;
    pool.assign_op_ids(&mut ops)?;
    pool.invalidate(list_id);
    Ok(LocalChange {
        ops,
        reverse: vec![Op::delete_node(child.clone())],
        update: StorageUpdate::list(
            list_id,
            vec![ListUpdate::Insert {
                index,
                item: item(pool, &child),
            }],
        ),
    })
}

/// Local `push`.
pub(crate) fn push(
    pool: &mut NodePool,
    list_id: &str,
    value: &LiveValue,
) -> Result<LocalChange, CrdtError> {
    let len = pool.list(list_id)?.len();
    insert(pool, list_id, len, value)
}

/// Local `move`. Returns `None` when `index == target`.
pub(crate) fn move_item(
    pool: &mut NodePool,
    list_id: &str,
    index: usize,
    target: usize,
) -> Result<Option<LocalChange>, CrdtError> {
    let list = pool.list(list_id)?;
    let len = list.len();
    if index >= len {
        return Err(out_of_bounds(index, len));
    }
    if target >= len {
        return Err(out_of_bounds(target, len));
    }
    if index == target {
        return Ok(None);
    }
    let (before, after) = if index < target {
        (
            Some(list.items[target].position.clone()),
            list.position_after(target),
        )
    } else {
        (
            target
                .checked_sub(1)
                .map(|i| list.items[i].position.clone()),
            Some(list.items[target].position.clone()),
        )
    };
    let position = make_position(before.as_ref(), after.as_ref())?;
    let moved = list.items[index].clone();

    let new_index = reposition(pool, list_id, &moved.id, position.clone())?;
    pool.invalidate(list_id);
    Ok(Some(LocalChange {
        ops: vec![Op::SetParentKey {
            id: moved.id.clone(),
            op_id: Some(pool.generate_op_id()?),
            parent_key: position.to_string(),
        }],
        reverse: vec![Op::SetParentKey {
            id: moved.id.clone(),
            op_id: None,
            parent_key: moved.position.to_string(),
        }],
        update: StorageUpdate::list(
            list_id,
            vec![ListUpdate::Move {
                index: new_index,
                previous_index: index,
                item: item(pool, &moved.id),
            }],
        ),
    }))
}

/// Local `delete` at `index`.
pub(crate) fn delete(
    pool: &mut NodePool,
    list_id: &str,
    index: usize,
) -> Result<LocalChange, CrdtError> {
    let list = pool.list_mut(list_id)?;
    if index >= list.len() {
        return Err(out_of_bounds(index, list.len()));
    }
    let removed = list.items.remove(index);
    let tree = pool.detach(&removed.id)?;
    pool.invalidate(list_id);
    Ok(LocalChange {
        ops: vec![Op::DeleteNode {
            id: removed.id,
            op_id: Some(pool.generate_op_id()?),
        }],
        reverse: tree.to_ops(list_id),
        update: StorageUpdate::list(list_id, vec![ListUpdate::Delete { index }]),
    })
}

/// Local `set`: replaces the child at `index` in one step.
pub(crate) fn set(
    pool: &mut NodePool,
    list_id: &str,
    index: usize,
    value: &LiveValue,
) -> Result<LocalChange, CrdtError> {
    let list = pool.list(list_id)?;
    let Some(existing) = list.get(index).cloned() else {
        return Err(out_of_bounds(index, list.len()));
    };
    let tree = pool.detach(&existing.id)?;
    let child = pool.attach_value(value, list_id, existing.position.as_str())?;
    swap_into_slot(pool, list_id, index, &child, false)?;

    let mut ops = with_replace_intent(pool.create_ops(&child)?, &existing.id);
    pool.assign_op_ids(&mut ops)?;
    if let Some(op_id) = ops.first().and_then(Op::op_id) {
        let op_id = op_id.to_string();
        pool.list_mut(list_id)?
            .unacknowledged_sets
            .insert(existing.position.clone(), op_id);
    }
    pool.invalidate(list_id);
    Ok(LocalChange {
        ops,
        reverse: with_replace_intent(tree.to_ops(list_id), &child),
        update: StorageUpdate::list(
            list_id,
            vec![ListUpdate::Replace {
                index,
                item: item(pool, &child),
            }],
        ),
    })
}

/// Local `clear`: deletes every child.
pub(crate) fn clear(pool: &mut NodePool, list_id: &str) -> Result<LocalChange, CrdtError> {
    let removed = std::mem::take(&mut pool.list_mut(list_id)?.items);
    let mut ops = Vec::with_capacity(removed.len());
    let mut reverse = Vec::new();
    let mut updates = Vec::with_capacity(removed.len());
    for entry in removed {
        let tree = pool.detach(&entry.id)?;
        reverse.extend(tree.to_ops(list_id));
        ops.push(Op::DeleteNode {
            id: entry.id,
            op_id: Some(pool.generate_op_id()?),
        });
        updates.push(ListUpdate::Delete { index: 0 });
    }
    pool.invalidate(list_id);
    Ok(LocalChange {
        ops,
        reverse,
        update: StorageUpdate::list(list_id, updates),
    })
}
