//! Background task driving one room.
//!
//! The task owns the transport. It wakes on inbound messages, on the flush
//! deadline and on commands from the [`Room`](super::Room) handle, and keeps the
//! document's outbound buffer drained within the throttle window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{Instrument, debug, info, info_span, warn};

use super::transport::Transport;
use crate::sync::{ClientMessage, Document, Flush, ServerMessage};

/// Commands that can be sent to the room task
pub(crate) enum RoomCommand {
    /// Something was queued; re-check the outbound buffer
    Kick,
    /// Send everything queued now, ignoring the throttle
    Flush { response: oneshot::Sender<()> },
    /// Drop the transport and go offline
    Disconnect { response: oneshot::Sender<()> },
    /// Start a new session on `transport`
    Reconnect {
        transport: Box<dyn Transport>,
        response: oneshot::Sender<()>,
    },
    /// Close the document and stop the task
    Close { response: oneshot::Sender<()> },
}

pub(crate) struct RoomTask {
    document: Arc<Mutex<Document>>,
    transport: Option<Box<dyn Transport>>,
    commands: mpsc::Receiver<RoomCommand>,
    loaded: watch::Sender<bool>,
}

impl RoomTask {
    pub(crate) fn new(
        document: Arc<Mutex<Document>>,
        transport: Box<dyn Transport>,
        commands: mpsc::Receiver<RoomCommand>,
        loaded: watch::Sender<bool>,
    ) -> Self {
        Self {
            document,
            transport: Some(transport),
            commands,
            loaded,
        }
    }

    /// Main event loop
    pub(crate) async fn run(mut self) {
        let actor = self.transport.as_ref().map(|t| t.actor());
        async move {
            info!("Starting room task");
            loop {
                let deadline = self.flush().await;
                tokio::select! {
                    message = recv_from(&mut self.transport) => match message {
                        Some(message) => self.handle_message(message).await,
                        None => self.go_offline("transport closed").await,
                    },

                    _ = sleep_or_pending(deadline) => {}

                    command = self.commands.recv() => match command {
                        Some(RoomCommand::Close { response }) => {
                            self.close().await;
                            let _ = response.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // every Room handle is gone
                            self.close().await;
                            break;
                        }
                    },
                }
            }
            info!("Room task stopped");
        }
        .instrument(info_span!("room", ?actor))
        .await
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Kick => {}
            RoomCommand::Flush { response } => {
                let messages = self.document.lock().await.flush_now();
                self.send(messages).await;
                let _ = response.send(());
            }
            RoomCommand::Disconnect { response } => {
                self.go_offline("disconnect requested").await;
                let _ = response.send(());
            }
            RoomCommand::Reconnect {
                transport,
                response,
            } => {
                let actor = transport.actor();
                self.document.lock().await.connect(actor);
                self.transport = Some(transport);
                info!(actor, "Reconnected");
                let _ = response.send(());
            }
            RoomCommand::Close { response } => {
                self.close().await;
                let _ = response.send(());
            }
        }
    }

    async fn handle_message(&mut self, message: ServerMessage) {
        let mut document = self.document.lock().await;
        if let Err(err) = document.receive(message) {
            warn!(error = %err, "Failed to apply server message");
        }
        self.loaded.send_replace(document.is_loaded());
    }

    /// Sends what the throttle allows; returns how long until the rest may go.
    async fn flush(&mut self) -> Option<Duration> {
        let flush = self.document.lock().await.poll_flush();
        match flush {
            Flush::Ready(messages) => {
                self.send(messages).await;
                None
            }
            Flush::Pending(delay) => Some(delay),
            Flush::Idle => None,
        }
    }

    async fn send(&mut self, messages: Vec<ClientMessage>) {
        if messages.is_empty() {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        debug!(messages = messages.len(), "Sending to server");
        if let Err(err) = transport.send(messages).await {
            warn!(error = %err, "Send failed");
            self.go_offline("send failed").await;
        }
    }

    async fn go_offline(&mut self, reason: &str) {
        info!(reason, "Room going offline");
        self.transport = None;
        self.document.lock().await.disconnect();
    }

    async fn close(&mut self) {
        self.transport = None;
        self.document.lock().await.close();
        self.loaded.send_replace(false);
    }
}

async fn recv_from(transport: &mut Option<Box<dyn Transport>>) -> Option<ServerMessage> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending(deadline: Option<Duration>) {
    match deadline {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}
