use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use super::Document;
use super::history::{HistoryItem, HistoryOp};
use crate::crdt::{ApplyResult, NodeId, NodeType, Op, OpSource, UpdateSet};

/// Aggregate result of applying a history item or an inbound batch.
#[derive(Debug, Default)]
pub(super) struct ApplyOutcome {
    /// Reverse of everything applied, newest first.
    pub reverse: HistoryItem,
    pub updates: UpdateSet,
    pub presence: bool,
    /// Local operations to send, with op ids.
    pub ops: Vec<Op>,
}

impl Document {
    /// Applies `items` in order.
    ///
    /// Local items (undo, redo, replay) get op ids and are applied as [`OpSource::Replay`].
    /// Inbound operations are [`OpSource::Ack`] when they echo an unacknowledged local
    /// operation and [`OpSource::Remote`] otherwise. Nodes created within the same
    /// batch report no deltas or reverse operations of their own: the creation of
    /// their ancestor already covers them.
    pub(super) fn apply_ops(
        &mut self,
        items: HistoryItem,
        is_local: bool,
    ) -> crate::Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        let mut created: HashSet<NodeId> = HashSet::new();

        for item in items {
            match item {
                HistoryOp::Presence(patch) => {
                    let reverse = self.apply_presence(patch);
                    outcome.reverse.insert(0, HistoryOp::Presence(reverse));
                    outcome.presence = true;
                }
                HistoryOp::Storage(mut op) => {
                    if is_local && op.op_id().is_none() {
                        op.set_op_id(self.pool.generate_op_id()?);
                    }
                    let source = self.source_of(&op, is_local);
                    if op.is_ack() {
                        continue;
                    }

                    let result = match self.pool.apply_op(&op, source) {
                        Ok(result) => result,
                        Err(err) if !is_local => {
                            warn!(op = op.kind(), id = op.id(), error = %err, "Discarding inbound op");
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    };

                    if let ApplyResult::Modified { update, reverse } = result {
                        let covered = created.contains(update.node())
                            || (op.as_create().is_none() && created.contains(op.id()));
                        if !covered {
                            outcome.updates.add(update);
                            outcome
                                .reverse
                                .splice(0..0, reverse.into_iter().map(HistoryOp::Storage));
                        }
                        if let Some((node_type, create)) = op.as_create() {
                            if node_type != NodeType::Leaf {
                                created.insert(create.id.clone());
                            }
                        }
                    }
                    if is_local {
                        outcome.ops.push(op);
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Picks the origin of `op`, consuming its unacknowledged entry if it is an echo.
    fn source_of(&mut self, op: &Op, is_local: bool) -> OpSource {
        if is_local {
            return OpSource::Replay;
        }
        let Some(op_id) = op.op_id() else {
            return OpSource::Remote;
        };
        match self.unacknowledged.shift_remove(op_id) {
            Some(original) => {
                if op.is_ack() {
                    debug!(op_id, "Server rejected op");
                    self.pool.release_pending(&original);
                }
                OpSource::Ack
            }
            None => OpSource::Remote,
        }
    }

    /// Patches presence and returns the patch that reverts it.
    fn apply_presence(
        &mut self,
        patch: BTreeMap<String, Option<serde_json::Value>>,
    ) -> BTreeMap<String, Option<serde_json::Value>> {
        let mut reverse = BTreeMap::new();
        for (key, value) in patch {
            let previous = match value {
                Some(value) => {
                    self.buffer.patch_presence(key.clone(), value.clone());
                    self.presence.insert(key.clone(), value)
                }
                None => {
                    self.buffer
                        .patch_presence(key.clone(), serde_json::Value::Null);
                    self.presence.remove(&key)
                }
            };
            reverse.insert(key, previous);
        }
        reverse
    }
}
