//! Error types for the synchronizer and the room driver.

use thiserror::Error;

/// Errors that can occur while synchronizing a document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// A mutation or read needs the storage snapshot, which has not arrived yet.
    #[error("Storage has not been loaded yet")]
    StorageNotLoaded,

    /// `batch` was called while another batch was open.
    #[error("Batches cannot be nested")]
    NestedBatch,

    /// `undo` or `redo` was called while a batch was open.
    #[error("{operation} is not allowed during a batch")]
    HistoryDuringBatch { operation: &'static str },

    /// The transport failed to deliver or receive messages.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The room task has shut down.
    #[error("Room is closed")]
    RoomClosed,

    /// The server sent a message that cannot be applied in the current state.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}

impl SyncError {
    /// Check if this is a violated API contract (misuse by the caller).
    pub fn is_contract_error(&self) -> bool {
        matches!(
            self,
            SyncError::NestedBatch | SyncError::HistoryDuringBatch { .. }
        )
    }

    /// Check if this is a transport error.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }

    /// Check if the room is no longer running.
    pub fn is_closed(&self) -> bool {
        matches!(self, SyncError::RoomClosed)
    }
}

impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        crate::Error::Sync(err)
    }
}
