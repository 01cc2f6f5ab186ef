//! The synchronizer.
//!
//! A [`Document`] owns the node pool of one replicated tree together with everything
//! needed to keep it in step with the ordering server: the outbound buffer, the
//! operations sent but not yet echoed back, the undo/redo stacks and the open batch.
//!
//! `Document` is a synchronous state machine. It never performs I/O. The caller feeds
//! it [`ServerMessage`]s through [`Document::receive`] and drains outbound
//! [`ClientMessage`]s with [`Document::poll_flush`]; [`crate::room::Room`] does both on
//! a background task.
//!
//! ## Data flow
//!
//! A local mutation updates the pool immediately and yields forward operations,
//! reverse operations and an update delta. `dispatch` queues the forward operations,
//! pushes the reverse ones onto the undo stack and notifies subscribers. Inbound
//! operations, undo, redo and reconnect replay all go through the same `apply_ops`
//! path, tagged with the origin that selects each node's conflict policy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::crdt::{LocalChange, NodeId, NodePool, Op, OpId, SerializedNode, StorageUpdate, UpdateSet};

mod apply;
pub mod config;
pub(crate) mod diff;
pub mod error;
pub mod handles;
pub mod history;
pub mod protocol;

pub use config::DocumentConfig;
pub use error::SyncError;
pub use handles::{LiveDict, LiveList, LiveRecord};
pub use history::{HistoryItem, HistoryOp};
pub use protocol::{ClientMessage, ServerMessage};

use history::History;

/// Connection state as seen by the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never connected, or closed.
    Closed,
    /// Waiting for a storage snapshot.
    Connecting,
    Open,
    /// The transport dropped; local edits keep queueing.
    Offline,
}

/// Result of [`Document::poll_flush`].
#[derive(Debug, Clone, PartialEq)]
pub enum Flush {
    /// Messages to send now.
    Ready(Vec<ClientMessage>),
    /// Something is queued but the throttle window is still open.
    Pending(Duration),
    /// Nothing to send.
    Idle,
}

/// What changed in one notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateNotification {
    pub storage: Vec<StorageUpdate>,
    pub presence: bool,
}

impl UpdateNotification {
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty() && !self.presence
    }
}

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&UpdateNotification) + Send>;

#[derive(Debug, Default)]
struct Buffer {
    storage_ops: Vec<Op>,
    presence: Option<Map<String, Value>>,
    fetch_storage: bool,
    last_flush: Option<u64>,
}

impl Buffer {
    fn is_empty(&self, status: ConnectionStatus) -> bool {
        let storage = status == ConnectionStatus::Open && !self.storage_ops.is_empty();
        !storage && self.presence.is_none() && !self.fetch_storage
    }

    fn patch_presence(&mut self, key: String, value: Value) {
        self.presence.get_or_insert_with(Map::new).insert(key, value);
    }
}

/// State accumulated while a batch is open.
#[derive(Debug, Default)]
struct Batch {
    ops: Vec<Op>,
    reverse: HistoryItem,
    updates: UpdateSet,
    presence: bool,
}

/// One replica of a replicated tree.
pub struct Document {
    config: DocumentConfig,
    clock: Arc<dyn Clock>,
    status: ConnectionStatus,
    pool: NodePool,
    root: Option<NodeId>,
    buffer: Buffer,
    unacknowledged: IndexMap<OpId, Op>,
    history: History,
    batch: Option<Batch>,
    presence: Map<String, Value>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("status", &self.status)
            .field("actor", &self.pool.actor())
            .field("nodes", &self.pool.len())
            .field("unacknowledged", &self.unacknowledged.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new(DocumentConfig::default())
    }
}

impl Document {
    pub fn new(config: DocumentConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a document whose flush throttle reads time from `clock`.
    pub fn with_clock(config: DocumentConfig, clock: Arc<dyn Clock>) -> Self {
        let history = History::new(config.max_undo_stack);
        Self {
            config,
            clock,
            status: ConnectionStatus::Closed,
            pool: NodePool::new(),
            root: None,
            buffer: Buffer::default(),
            unacknowledged: IndexMap::new(),
            history,
            batch: None,
            presence: Map::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn actor(&self) -> Option<u64> {
        self.pool.actor()
    }

    pub fn is_loaded(&self) -> bool {
        self.root.is_some()
    }

    /// Read access to the node arena.
    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    /// Immutable projection of the whole tree, `Null` before the first snapshot.
    pub fn snapshot(&self) -> Value {
        match &self.root {
            Some(root) => self.pool.to_json(root),
            None => Value::Null,
        }
    }

    /// The current id→node table in storage form.
    pub fn serialized_items(&self) -> crate::Result<IndexMap<NodeId, SerializedNode>> {
        Ok(self.pool.serialized_items()?)
    }

    pub fn presence(&self) -> &Map<String, Value> {
        &self.presence
    }

    /// Whether local operations are still waiting for the server's echo.
    pub fn has_pending_changes(&self) -> bool {
        !self.unacknowledged.is_empty()
    }

    pub fn unacknowledged_len(&self) -> usize {
        self.unacknowledged.len()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn root_id(&self) -> Result<&NodeId, SyncError> {
        self.root.as_ref().ok_or(SyncError::StorageNotLoaded)
    }

    // ===== Subscriptions =====

    /// Registers a callback invoked after every change to storage or presence.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&UpdateNotification) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    fn notify(&mut self, notification: UpdateNotification) {
        if notification.is_empty() {
            return;
        }
        for (_, callback) in &mut self.subscribers {
            callback(&notification);
        }
    }

    // ===== Local changes =====

    /// Routes the outcome of a local mutation.
    ///
    /// Inside a batch everything accumulates until the batch ends. Otherwise the
    /// reverse operations become an undo entry, the redo stack is cleared, the
    /// forward operations are queued and subscribers are notified.
    pub(crate) fn dispatch(&mut self, change: LocalChange) {
        let LocalChange {
            ops,
            reverse,
            update,
        } = change;
        let reverse: HistoryItem = reverse.into_iter().map(HistoryOp::Storage).collect();

        if let Some(batch) = &mut self.batch {
            batch.ops.extend(ops);
            batch.reverse.splice(0..0, reverse);
            batch.updates.add(update);
            return;
        }

        self.history.record(reverse);
        self.history.clear_redo();
        self.queue_ops(ops);
        self.notify(UpdateNotification {
            storage: vec![update],
            presence: false,
        });
    }

    /// Tracks operations as unacknowledged and buffers them when the connection is open.
    fn queue_ops(&mut self, ops: Vec<Op>) {
        for op in ops {
            if let Some(op_id) = op.op_id() {
                self.unacknowledged.insert(op_id.to_string(), op.clone());
            }
            if self.status == ConnectionStatus::Open {
                self.buffer.storage_ops.push(op);
            }
        }
    }

    /// Merges `patch` into the local presence.
    ///
    /// With `add_to_history` the previous values become an undo entry.
    pub fn update_presence(&mut self, patch: Map<String, Value>, add_to_history: bool) {
        let mut previous = BTreeMap::new();
        for (key, value) in patch {
            previous.insert(key.clone(), self.presence.get(&key).cloned());
            self.buffer.patch_presence(key.clone(), value.clone());
            self.presence.insert(key, value);
        }
        if previous.is_empty() {
            return;
        }
        let reverse = if add_to_history {
            vec![HistoryOp::Presence(previous)]
        } else {
            Vec::new()
        };

        if let Some(batch) = &mut self.batch {
            batch.reverse.splice(0..0, reverse);
            batch.presence = true;
            return;
        }
        self.history.record(reverse);
        self.notify(UpdateNotification {
            storage: Vec::new(),
            presence: true,
        });
    }

    // ===== History =====

    /// Reverts the most recent undo entry.
    pub fn undo(&mut self) -> crate::Result<()> {
        if self.batch.is_some() {
            return Err(SyncError::HistoryDuringBatch { operation: "undo" }.into());
        }
        let Some(item) = self.history.pop_undo() else {
            return Ok(());
        };
        self.history.discard_paused();
        let outcome = self.apply_ops(item, true)?;
        self.history.push_redo(outcome.reverse);
        self.queue_ops(outcome.ops);
        self.notify(UpdateNotification {
            storage: outcome.updates.into_vec(),
            presence: outcome.presence,
        });
        Ok(())
    }

    /// Reapplies the most recently undone entry.
    pub fn redo(&mut self) -> crate::Result<()> {
        if self.batch.is_some() {
            return Err(SyncError::HistoryDuringBatch { operation: "redo" }.into());
        }
        let Some(item) = self.history.pop_redo() else {
            return Ok(());
        };
        self.history.discard_paused();
        let outcome = self.apply_ops(item, true)?;
        self.history.push_undo(outcome.reverse);
        self.queue_ops(outcome.ops);
        self.notify(UpdateNotification {
            storage: outcome.updates.into_vec(),
            presence: outcome.presence,
        });
        Ok(())
    }

    /// Starts coalescing undo entries into one until [`resume_history`](Self::resume_history).
    pub fn pause_history(&mut self) {
        self.history.pause();
    }

    pub fn resume_history(&mut self) {
        self.history.resume();
    }

    /// Runs `f` as one atomic change.
    ///
    /// Operations made inside are flushed together, produce one undo entry and one
    /// notification. The batch is committed even when `f` fails.
    pub fn batch<T, F>(&mut self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&mut Document) -> crate::Result<T>,
    {
        if self.batch.is_some() {
            return Err(SyncError::NestedBatch.into());
        }
        self.batch = Some(Batch::default());
        let result = f(self);
        if let Some(batch) = self.batch.take() {
            self.commit_batch(batch);
        }
        result
    }

    pub fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    fn commit_batch(&mut self, batch: Batch) {
        let Batch {
            ops,
            reverse,
            updates,
            presence,
        } = batch;
        self.history.record(reverse);
        if !ops.is_empty() {
            self.history.clear_redo();
            self.queue_ops(ops);
        }
        self.notify(UpdateNotification {
            storage: updates.into_vec(),
            presence,
        });
    }

    // ===== Connection =====

    /// Starts a session as `actor` and requests the storage snapshot.
    pub fn connect(&mut self, actor: u64) {
        info!(actor, previous = ?self.status, "Connecting document");
        self.pool.set_actor(actor);
        self.status = ConnectionStatus::Connecting;
        self.buffer.storage_ops.clear();
        self.buffer.fetch_storage = true;
        if !self.presence.is_empty() {
            self.buffer.presence = Some(self.presence.clone());
        }
    }

    /// Marks the session lost. Local state and unacknowledged operations are kept.
    pub fn disconnect(&mut self) {
        if self.status == ConnectionStatus::Closed {
            return;
        }
        warn!(
            actor = ?self.pool.actor(),
            unacknowledged = self.unacknowledged.len(),
            "Document went offline"
        );
        self.status = ConnectionStatus::Offline;
        self.buffer.storage_ops.clear();
        self.buffer.fetch_storage = false;
    }

    /// Ends the document's life: drops subscribers and everything queued.
    pub fn close(&mut self) {
        info!(actor = ?self.pool.actor(), "Closing document");
        self.status = ConnectionStatus::Closed;
        self.subscribers.clear();
        self.buffer = Buffer::default();
    }

    /// Handles one message from the server.
    pub fn receive(&mut self, message: ServerMessage) -> crate::Result<()> {
        match message {
            ServerMessage::InitialStorageState { items } => self.on_storage_state(items),
            ServerMessage::UpdateStorage { ops } => {
                if self.root.is_none() {
                    debug!(ops = ops.len(), "Ignoring updates received before the snapshot");
                    return Ok(());
                }
                let items = ops.into_iter().map(HistoryOp::Storage).collect();
                let outcome = self.apply_ops(items, false)?;
                debug!(
                    updates = outcome.updates.len(),
                    unacknowledged = self.unacknowledged.len(),
                    "Applied server batch"
                );
                self.notify(UpdateNotification {
                    storage: outcome.updates.into_vec(),
                    presence: false,
                });
                Ok(())
            }
        }
    }

    /// Loads the first snapshot, or reconciles with a fresh one after a reconnect.
    fn on_storage_state(&mut self, items: Vec<(NodeId, SerializedNode)>) -> crate::Result<()> {
        if self.root.is_none() {
            let root = self.pool.load(items)?;
            info!(nodes = self.pool.len(), root = %root, "Storage loaded");
            self.root = Some(root);
            self.status = ConnectionStatus::Open;
            return Ok(());
        }

        let current = self.pool.serialized_items()?;
        let fresh: IndexMap<NodeId, SerializedNode> = items.into_iter().collect();
        let ops = diff::tree_diff(&current, &fresh);
        debug!(ops = ops.len(), "Applying reconnect diff");
        let mut outcome = self.apply_ops(ops.into_iter().map(HistoryOp::Storage).collect(), false)?;

        self.status = ConnectionStatus::Open;
        let pending: HistoryItem = self
            .unacknowledged
            .values()
            .cloned()
            .map(HistoryOp::Storage)
            .collect();
        if !pending.is_empty() {
            debug!(ops = pending.len(), "Replaying unacknowledged operations");
            let replay = self.apply_ops(pending, true)?;
            self.buffer.storage_ops.extend(replay.ops);
            outcome.updates.extend(replay.updates);
        }
        self.notify(UpdateNotification {
            storage: outcome.updates.into_vec(),
            presence: false,
        });
        Ok(())
    }

    /// Drains the outbound buffer if the throttle window allows it.
    pub fn poll_flush(&mut self) -> Flush {
        if !matches!(
            self.status,
            ConnectionStatus::Open | ConnectionStatus::Connecting
        ) || self.buffer.is_empty(self.status)
        {
            return Flush::Idle;
        }
        let now = self.clock.now_millis();
        if let Some(last) = self.buffer.last_flush {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.config.throttle_ms {
                return Flush::Pending(Duration::from_millis(self.config.throttle_ms - elapsed));
            }
        }
        Flush::Ready(self.drain(now))
    }

    /// Drains the outbound buffer regardless of the throttle.
    pub fn flush_now(&mut self) -> Vec<ClientMessage> {
        if !matches!(
            self.status,
            ConnectionStatus::Open | ConnectionStatus::Connecting
        ) || self.buffer.is_empty(self.status)
        {
            return Vec::new();
        }
        let now = self.clock.now_millis();
        self.drain(now)
    }

    fn drain(&mut self, now: u64) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        if let Some(data) = self.buffer.presence.take() {
            messages.push(ClientMessage::UpdatePresence { data });
        }
        if std::mem::take(&mut self.buffer.fetch_storage) {
            messages.push(ClientMessage::FetchStorage);
        }
        if self.status == ConnectionStatus::Open && !self.buffer.storage_ops.is_empty() {
            let ops = std::mem::take(&mut self.buffer.storage_ops);
            messages.push(ClientMessage::UpdateStorage { ops });
        }
        self.buffer.last_flush = Some(now);
        debug!(messages = messages.len(), "Flushing outbound buffer");
        messages
    }
}
