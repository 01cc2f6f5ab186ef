//! Async driver connecting a [`Document`] to an ordering server.
//!
//! A [`Room`] owns its document behind a mutex and runs one background task per
//! room. Mutations go through [`Room::mutate`], which applies them synchronously and
//! wakes the task so the outbound buffer is flushed on the throttle.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> livetree::Result<()> {
//! use livetree::room::{LocalServer, Room};
//! use livetree::Document;
//!
//! let server = LocalServer::default();
//! let room = Room::enter(Document::default(), Box::new(server.connect().await));
//! room.storage().await?;
//! room.mutate(|doc| doc.root()?.set("title", "hello")).await?;
//! room.flush().await?;
//! # room.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::sync::{Document, SyncError};

mod background;
pub mod server;
pub mod transport;

pub use server::{ChannelTransport, LocalServer, ServerOutput, ServerStorage};
pub use transport::Transport;

use background::{RoomCommand, RoomTask};

/// Handle to a running room.
#[derive(Debug)]
pub struct Room {
    document: Arc<Mutex<Document>>,
    commands: mpsc::Sender<RoomCommand>,
    loaded: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl Room {
    /// Connects `document` over `transport` and spawns the room task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enter(mut document: Document, transport: Box<dyn Transport>) -> Self {
        document.connect(transport.actor());
        let loaded = document.is_loaded();
        let document = Arc::new(Mutex::new(document));
        let (command_tx, command_rx) = mpsc::channel(100);
        let (loaded_tx, loaded_rx) = watch::channel(loaded);
        let task = RoomTask::new(Arc::clone(&document), transport, command_rx, loaded_tx);
        let task = tokio::spawn(task.run());
        Self {
            document,
            commands: command_tx,
            loaded: loaded_rx,
            task,
        }
    }

    /// Resolves once the first storage snapshot has been loaded.
    pub async fn storage(&self) -> crate::Result<()> {
        let mut loaded = self.loaded.clone();
        loaded
            .wait_for(|loaded| *loaded)
            .await
            .map_err(|_| SyncError::RoomClosed)?;
        Ok(())
    }

    /// Runs `f` against the document and schedules a flush.
    pub async fn mutate<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&mut Document) -> crate::Result<T>,
    {
        let result = {
            let mut document = self.document.lock().await;
            f(&mut document)
        };
        if self.commands.try_send(RoomCommand::Kick).is_err() {
            debug!("Room task busy or stopped; flush deferred");
        }
        result
    }

    /// Runs `f` against the document without mutating it.
    pub async fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Document) -> T,
    {
        let document = self.document.lock().await;
        f(&document)
    }

    pub async fn snapshot(&self) -> Value {
        self.document.lock().await.snapshot()
    }

    /// Shared access to the document, e.g. to subscribe.
    pub fn document(&self) -> Arc<Mutex<Document>> {
        Arc::clone(&self.document)
    }

    /// Sends everything queued without waiting for the throttle.
    pub async fn flush(&self) -> crate::Result<()> {
        self.request(|response| RoomCommand::Flush { response })
            .await
    }

    /// Drops the transport; local edits keep queueing until [`reconnect`](Self::reconnect).
    pub async fn disconnect(&self) -> crate::Result<()> {
        self.request(|response| RoomCommand::Disconnect { response })
            .await
    }

    /// Starts a new session and resynchronizes once the fresh snapshot arrives.
    pub async fn reconnect(&self, transport: Box<dyn Transport>) -> crate::Result<()> {
        self.request(|response| RoomCommand::Reconnect {
            transport,
            response,
        })
        .await
    }

    /// Closes the document and waits for the task to stop.
    pub async fn close(self) -> crate::Result<()> {
        let result = self
            .request(|response| RoomCommand::Close { response })
            .await;
        let _ = self.task.await;
        result
    }

    async fn request<F>(&self, command: F) -> crate::Result<()>
    where
        F: FnOnce(oneshot::Sender<()>) -> RoomCommand,
    {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SyncError::RoomClosed)?;
        rx.await.map_err(|_| SyncError::RoomClosed)?;
        Ok(())
    }
}
