//! Undo/redo stacks.
//!
//! A history item is an ordered bundle of reverse operations, applied as one unit.
//! The undo stack is bounded and evicts its oldest entry. While history is paused,
//! new entries coalesce into a single pending item.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::crdt::Op;

/// One reverse step: a storage operation or a presence patch.
///
/// A presence patch maps keys to their previous value, `None` meaning the key was absent.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOp {
    Storage(Op),
    Presence(BTreeMap<String, Option<Value>>),
}

pub type HistoryItem = Vec<HistoryOp>;

#[derive(Debug)]
pub struct History {
    undo: VecDeque<HistoryItem>,
    redo: Vec<HistoryItem>,
    paused: Option<HistoryItem>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            paused: None,
            limit: limit.max(1),
        }
    }

    /// Records a new undo entry, or prepends it to the paused entry.
    pub fn record(&mut self, item: HistoryItem) {
        if item.is_empty() {
            return;
        }
        match &mut self.paused {
            Some(paused) => {
                paused.splice(0..0, item);
            }
            None => self.push_undo(item),
        }
    }

    pub fn push_undo(&mut self, item: HistoryItem) {
        if self.undo.len() >= self.limit {
            self.undo.pop_front();
        }
        self.undo.push_back(item);
    }

    pub fn pop_undo(&mut self) -> Option<HistoryItem> {
        self.undo.pop_back()
    }

    pub fn push_redo(&mut self, item: HistoryItem) {
        self.redo.push(item);
    }

    pub fn pop_redo(&mut self) -> Option<HistoryItem> {
        self.redo.pop()
    }

    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    pub fn pause(&mut self) {
        if self.paused.is_none() {
            self.paused = Some(Vec::new());
        }
    }

    /// Ends a pause, turning everything recorded since into one undo entry.
    pub fn resume(&mut self) {
        if let Some(item) = self.paused.take() {
            self.record(item);
        }
    }

    /// Drops a pending pause without recording it.
    pub fn discard_paused(&mut self) {
        self.paused = None;
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }
}
