//! Transport abstraction between a room and its ordering server.
//!
//! A transport is one session: it is bound to the actor id the server assigned on
//! connect and ends when either side drops it. Reconnecting means handing the room a
//! new transport.

use async_trait::async_trait;

use crate::sync::{ClientMessage, ServerMessage, SyncError};

/// One client session with the ordering server.
#[async_trait]
pub trait Transport: Send {
    /// Actor id assigned to this session.
    fn actor(&self) -> u64;

    /// Delivers outbound messages in order.
    ///
    /// # Errors
    /// Returns [`SyncError::Transport`] when the session is gone.
    async fn send(&mut self, messages: Vec<ClientMessage>) -> Result<(), SyncError>;

    /// Next inbound message, or `None` once the session has ended.
    async fn recv(&mut self) -> Option<ServerMessage>;
}
