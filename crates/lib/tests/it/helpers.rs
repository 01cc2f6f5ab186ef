//! Deterministic test network.
//!
//! Drives several [`Document`]s against one [`ServerStorage`] without any async
//! runtime. Messages are queued per client and only move when a test calls
//! [`Network::send`], [`Network::deliver`] or [`Network::sync`], so interleavings
//! are fully under the test's control.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use livetree::{
    Document, DocumentConfig, FixedClock, LiveValue,
    crdt::{CreateOp, Op},
    room::ServerStorage,
    sync::{ClientMessage, ServerMessage, UpdateNotification},
};
use serde_json::Value;

/// Id of the list created by [`Network::with_list`].
pub const LIST_ID: &str = "0:0";
/// Id of the dictionary created by [`Network::with_dict`].
pub const DICT_ID: &str = "0:1";

pub struct Client {
    pub doc: Document,
    pub inbox: VecDeque<ServerMessage>,
    pub online: bool,
}

pub struct Network {
    pub server: ServerStorage,
    pub clients: Vec<Client>,
    next_actor: u64,
}

impl Network {
    pub fn new(initial: Vec<Op>) -> Self {
        let mut server = ServerStorage::default();
        let output = server.apply(initial);
        assert!(output.to_sender.is_empty(), "initial storage was rejected");
        Self {
            server,
            clients: Vec::new(),
            next_actor: 1,
        }
    }

    /// Storage with an empty list at `root.items`.
    pub fn with_list() -> Self {
        Self::new(vec![create_list(LIST_ID, "root", "items")])
    }

    /// Storage with an empty list at `root.items` and an empty dict at `root.tags`.
    pub fn with_dict() -> Self {
        Self::new(vec![
            create_list(LIST_ID, "root", "items"),
            Op::CreateDict(CreateOp::new(DICT_ID.into(), "root".into(), "tags".into())),
        ])
    }

    /// Connects a new client and loads its storage. Returns its index.
    pub fn add_client(&mut self) -> usize {
        self.add_client_with(DocumentConfig::default().with_throttle_ms(0))
    }

    pub fn add_client_with(&mut self, config: DocumentConfig) -> usize {
        let doc = Document::with_clock(config, Arc::new(FixedClock::new(0)));
        self.clients.push(Client {
            doc,
            inbox: VecDeque::new(),
            online: false,
        });
        let index = self.clients.len() - 1;
        self.reconnect(index);
        self.sync();
        index
    }

    pub fn doc(&mut self, client: usize) -> &mut Document {
        &mut self.clients[client].doc
    }

    /// Flushes one client's outbound buffer into the server.
    pub fn send(&mut self, client: usize) {
        if !self.clients[client].online {
            return;
        }
        let messages = self.clients[client].doc.flush_now();
        for message in messages {
            match message {
                ClientMessage::FetchStorage => {
                    let items = self.server.items();
                    self.clients[client]
                        .inbox
                        .push_back(ServerMessage::InitialStorageState { items });
                }
                ClientMessage::UpdateStorage { ops } => {
                    let output = self.server.apply(ops);
                    if !output.to_all.is_empty() {
                        for other in self.clients.iter_mut().filter(|c| c.online) {
                            other.inbox.push_back(ServerMessage::UpdateStorage {
                                ops: output.to_all.clone(),
                            });
                        }
                    }
                    if !output.to_sender.is_empty() {
                        self.clients[client]
                            .inbox
                            .push_back(ServerMessage::UpdateStorage {
                                ops: output.to_sender,
                            });
                    }
                }
                ClientMessage::UpdatePresence { .. } => {}
            }
        }
    }

    /// Applies everything queued for one client.
    pub fn deliver(&mut self, client: usize) {
        while let Some(message) = self.clients[client].inbox.pop_front() {
            self.clients[client]
                .doc
                .receive(message)
                .expect("server message should apply");
        }
    }

    /// Exchanges messages until nothing moves.
    pub fn sync(&mut self) {
        for _ in 0..100 {
            for client in 0..self.clients.len() {
                self.send(client);
            }
            if self.clients.iter().all(|c| c.inbox.is_empty()) {
                return;
            }
            for client in 0..self.clients.len() {
                self.deliver(client);
            }
        }
        panic!("network did not settle");
    }

    /// Drops a client's session. Its queued inbound messages are lost.
    pub fn disconnect(&mut self, client: usize) {
        let client = &mut self.clients[client];
        client.online = false;
        client.inbox.clear();
        client.doc.disconnect();
    }

    /// Starts a new session with a fresh actor id.
    pub fn reconnect(&mut self, client: usize) {
        let actor = self.next_actor;
        self.next_actor += 1;
        let client = &mut self.clients[client];
        client.online = true;
        client.doc.connect(actor);
    }

    pub fn snapshot(&self, client: usize) -> Value {
        self.clients[client].doc.snapshot()
    }

    pub fn server_snapshot(&self) -> Value {
        self.server.snapshot().expect("server storage is a valid tree")
    }

    /// Asserts every client and the server hold the same tree.
    pub fn assert_converged(&self) {
        let expected = self.server_snapshot();
        for (index, client) in self.clients.iter().enumerate() {
            assert_eq!(
                client.doc.snapshot(),
                expected,
                "client {index} diverged from the server"
            );
            assert!(
                !client.doc.has_pending_changes(),
                "client {index} still has unacknowledged ops"
            );
        }
    }
}

pub fn create_list(id: &str, parent: &str, key: &str) -> Op {
    Op::CreateList(CreateOp::new(id.into(), parent.into(), key.into()))
}

/// Pushes `value` onto the shared list of `client`.
pub fn push(net: &mut Network, client: usize, value: impl Into<LiveValue>) {
    net.doc(client)
        .list(LIST_ID)
        .unwrap()
        .push(value)
        .unwrap();
}

/// Items of the shared list as seen by `client`.
pub fn items(net: &Network, client: usize) -> Value {
    net.snapshot(client)["items"].clone()
}

/// Collects every notification a document emits.
pub fn record_notifications(doc: &mut Document) -> Arc<Mutex<Vec<UpdateNotification>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    doc.subscribe(move |notification| sink.lock().unwrap().push(notification.clone()));
    seen
}
