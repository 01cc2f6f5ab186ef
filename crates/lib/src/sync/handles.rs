//! Typed views over nodes of a [`Document`].
//!
//! A handle borrows the document mutably, so every mutation made through it is
//! dispatched immediately: queued for the server, recorded for undo and reported
//! to subscribers.
//!
//! ```
//! use livetree::{Document, LiveValue};
//! use livetree::sync::ServerMessage;
//! use livetree::crdt::SerializedNode;
//!
//! let mut doc = Document::default();
//! doc.connect(1);
//! doc.receive(ServerMessage::InitialStorageState {
//!     items: vec![("root".into(), SerializedNode::Record {
//!         parent_id: None,
//!         parent_key: None,
//!         data: Default::default(),
//!     })],
//! }).unwrap();
//!
//! doc.root().unwrap().set("todos", LiveValue::list([])).unwrap();
//! doc.root().unwrap().list("todos").unwrap().push("write docs").unwrap();
//! assert_eq!(doc.snapshot()["todos"][0], "write docs");
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

use super::Document;
use crate::crdt::{CrdtError, Field, LiveValue, NodeId, dict, list, record};

/// View of a record node.
#[derive(Debug)]
pub struct LiveRecord<'a> {
    doc: &'a mut Document,
    id: NodeId,
}

/// View of a dictionary node.
#[derive(Debug)]
pub struct LiveDict<'a> {
    doc: &'a mut Document,
    id: NodeId,
}

/// View of an ordered list node.
#[derive(Debug)]
pub struct LiveList<'a> {
    doc: &'a mut Document,
    id: NodeId,
}

impl Document {
    /// The root record.
    pub fn root(&mut self) -> crate::Result<LiveRecord<'_>> {
        let id = self.root_id()?.clone();
        Ok(LiveRecord { doc: self, id })
    }

    pub fn record(&mut self, id: &str) -> crate::Result<LiveRecord<'_>> {
        self.root_id()?;
        self.pool.record(id)?;
        Ok(LiveRecord {
            doc: self,
            id: id.to_string(),
        })
    }

    pub fn dict(&mut self, id: &str) -> crate::Result<LiveDict<'_>> {
        self.root_id()?;
        self.pool.dict(id)?;
        Ok(LiveDict {
            doc: self,
            id: id.to_string(),
        })
    }

    pub fn list(&mut self, id: &str) -> crate::Result<LiveList<'_>> {
        self.root_id()?;
        self.pool.list(id)?;
        Ok(LiveList {
            doc: self,
            id: id.to_string(),
        })
    }
}

fn missing_child(parent: &str, key: &str) -> CrdtError {
    CrdtError::NodeNotFound {
        id: format!("{parent}/{key}"),
    }
}

impl<'a> LiveRecord<'a> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Projection of the value at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.doc.pool.record(&self.id).ok()?.get(key)? {
            Field::Value(value) => Some(value.clone()),
            Field::Node(child) => Some(self.doc.pool.to_json(child)),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.doc
            .pool
            .record(&self.id)
            .map(|record| record.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> Value {
        self.doc.pool.to_json(&self.id)
    }

    /// Id of the child node at `key`, if it holds a node.
    pub fn child_id(&self, key: &str) -> Option<NodeId> {
        match self.doc.pool.record(&self.id).ok()?.get(key)? {
            Field::Node(child) => Some(child.clone()),
            Field::Value(_) => None,
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<LiveValue>) -> crate::Result<()> {
        self.update([(key.to_string(), value.into())])
    }

    /// Writes several keys as one change.
    pub fn update<I>(&mut self, patch: I) -> crate::Result<()>
    where
        I: IntoIterator<Item = (String, LiveValue)>,
    {
        let patch: BTreeMap<String, LiveValue> = patch.into_iter().collect();
        if patch.is_empty() {
            return Ok(());
        }
        let change = record::update(&mut self.doc.pool, &self.id, patch)?;
        self.doc.dispatch(change);
        Ok(())
    }

    /// Removes `key`. Absent keys are ignored.
    pub fn delete(&mut self, key: &str) -> crate::Result<()> {
        if let Some(change) = record::delete(&mut self.doc.pool, &self.id, key)? {
            self.doc.dispatch(change);
        }
        Ok(())
    }

    fn child(&self, key: &str) -> Result<NodeId, CrdtError> {
        self.child_id(key)
            .ok_or_else(|| missing_child(&self.id, key))
    }

    pub fn record(self, key: &str) -> crate::Result<LiveRecord<'a>> {
        let id = self.child(key)?;
        self.doc.pool.record(&id)?;
        Ok(LiveRecord { doc: self.doc, id })
    }

    pub fn dict(self, key: &str) -> crate::Result<LiveDict<'a>> {
        let id = self.child(key)?;
        self.doc.pool.dict(&id)?;
        Ok(LiveDict { doc: self.doc, id })
    }

    pub fn list(self, key: &str) -> crate::Result<LiveList<'a>> {
        let id = self.child(key)?;
        self.doc.pool.list(&id)?;
        Ok(LiveList { doc: self.doc, id })
    }
}

impl<'a> LiveDict<'a> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let child = self.doc.pool.dict(&self.id).ok()?.get(key)?;
        Some(self.doc.pool.to_json(child))
    }

    pub fn keys(&self) -> Vec<String> {
        self.doc
            .pool
            .dict(&self.id)
            .map(|dict| dict.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.doc.pool.dict(&self.id).map_or(0, |dict| dict.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        self.doc.pool.to_json(&self.id)
    }

    pub fn child_id(&self, key: &str) -> Option<NodeId> {
        self.doc.pool.dict(&self.id).ok()?.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<LiveValue>) -> crate::Result<()> {
        let change = dict::set(&mut self.doc.pool, &self.id, key, &value.into())?;
        self.doc.dispatch(change);
        Ok(())
    }

    /// Removes `key`. Absent keys are ignored.
    pub fn delete(&mut self, key: &str) -> crate::Result<()> {
        if let Some(change) = dict::delete(&mut self.doc.pool, &self.id, key)? {
            self.doc.dispatch(change);
        }
        Ok(())
    }

    fn child(&self, key: &str) -> Result<NodeId, CrdtError> {
        self.child_id(key)
            .ok_or_else(|| missing_child(&self.id, key))
    }

    pub fn record(self, key: &str) -> crate::Result<LiveRecord<'a>> {
        let id = self.child(key)?;
        self.doc.pool.record(&id)?;
        Ok(LiveRecord { doc: self.doc, id })
    }

    pub fn list(self, key: &str) -> crate::Result<LiveList<'a>> {
        let id = self.child(key)?;
        self.doc.pool.list(&id)?;
        Ok(LiveList { doc: self.doc, id })
    }
}

impl<'a> LiveList<'a> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.doc.pool.list(&self.id).map_or(0, |list| list.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        let item = self.doc.pool.list(&self.id).ok()?.get(index)?;
        Some(self.doc.pool.to_json(&item.id))
    }

    pub fn to_json(&self) -> Value {
        self.doc.pool.to_json(&self.id)
    }

    pub fn child_id(&self, index: usize) -> Option<NodeId> {
        let item = self.doc.pool.list(&self.id).ok()?.get(index)?;
        Some(item.id.clone())
    }

    pub fn push(&mut self, value: impl Into<LiveValue>) -> crate::Result<()> {
        let change = list::push(&mut self.doc.pool, &self.id, &value.into())?;
        self.doc.dispatch(change);
        Ok(())
    }

    pub fn insert(&mut self, index: usize, value: impl Into<LiveValue>) -> crate::Result<()> {
        let change = list::insert(&mut self.doc.pool, &self.id, index, &value.into())?;
        self.doc.dispatch(change);
        Ok(())
    }

    /// Moves the item at `index` so that it ends up at `target`.
    pub fn move_item(&mut self, index: usize, target: usize) -> crate::Result<()> {
        if let Some(change) = list::move_item(&mut self.doc.pool, &self.id, index, target)? {
            self.doc.dispatch(change);
        }
        Ok(())
    }

    pub fn delete(&mut self, index: usize) -> crate::Result<()> {
        let change = list::delete(&mut self.doc.pool, &self.id, index)?;
        self.doc.dispatch(change);
        Ok(())
    }

    /// Replaces the item at `index` in one step.
    pub fn set(&mut self, index: usize, value: impl Into<LiveValue>) -> crate::Result<()> {
        let change = list::set(&mut self.doc.pool, &self.id, index, &value.into())?;
        self.doc.dispatch(change);
        Ok(())
    }

    pub fn clear(&mut self) -> crate::Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let change = list::clear(&mut self.doc.pool, &self.id)?;
        self.doc.dispatch(change);
        Ok(())
    }

    fn child(&self, index: usize) -> Result<NodeId, CrdtError> {
        self.child_id(index).ok_or(CrdtError::IndexOutOfBounds {
            index,
            len: self.len(),
        })
    }

    pub fn record(self, index: usize) -> crate::Result<LiveRecord<'a>> {
        let id = self.child(index)?;
        self.doc.pool.record(&id)?;
        Ok(LiveRecord { doc: self.doc, id })
    }

    pub fn list(self, index: usize) -> crate::Result<LiveList<'a>> {
        let id = self.child(index)?;
        self.doc.pool.list(&id)?;
        Ok(LiveList { doc: self.doc, id })
    }
}
