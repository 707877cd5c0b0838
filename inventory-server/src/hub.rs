use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

pub const CLIENT_QUEUE_CAPACITY: usize = 256;
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Hub-side view of one connected real-time client. Dropping the sender is
/// what ends the client's write loop, so removal from the hub map doubles as
/// the disconnect signal.
pub struct ClientHandle {
    pub id: Uuid,
    pub user_name: String,
    sender: mpsc::Sender<Vec<u8>>,
}

impl ClientHandle {
    pub fn new(user_name: String) -> (Self, mpsc::Receiver<Vec<u8>>) {
        Self::with_capacity(user_name, CLIENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(user_name: String, capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                id: Uuid::new_v4(),
                user_name,
                sender,
            },
            receiver,
        )
    }
}

enum HubCommand {
    Register(ClientHandle),
    Unregister(Uuid),
    Broadcast(Vec<u8>),
}

/// Cloneable handle for talking to the hub coordinator. All access to the
/// client set goes through this channel; nothing else sees the map.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn register(&self, client: ClientHandle) {
        let _ = self.commands.send(HubCommand::Register(client)).await;
    }

    pub async fn unregister(&self, id: Uuid) {
        let _ = self.commands.send(HubCommand::Unregister(id)).await;
    }

    pub async fn broadcast(&self, payload: Vec<u8>) {
        let _ = self.commands.send(HubCommand::Broadcast(payload)).await;
    }
}

/// Coordinator owning the set of locally-connected clients. Runs as a single
/// task; register/unregister/broadcast are serialized through its inbox.
pub struct BroadcastHub {
    commands: mpsc::Receiver<HubCommand>,
    clients: HashMap<Uuid, mpsc::Sender<Vec<u8>>>,
}

impl BroadcastHub {
    pub fn new() -> (HubHandle, Self) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        (
            HubHandle { commands: tx },
            Self {
                commands: rx,
                clients: HashMap::new(),
            },
        )
    }

    pub async fn run(mut self) {
        info!("Broadcast hub started");

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register(client) => {
                    info!("Client {} ({}) registered", client.id, client.user_name);
                    self.clients.insert(client.id, client.sender);
                }
                HubCommand::Unregister(id) => {
                    if self.clients.remove(&id).is_some() {
                        info!("Client {} unregistered. Total clients: {}", id, self.clients.len());
                    }
                }
                HubCommand::Broadcast(payload) => {
                    let mut stalled = Vec::new();

                    for (id, sender) in &self.clients {
                        if sender.try_send(payload.clone()).is_err() {
                            // Full queue or closed connection; either way the
                            // client must not hold up delivery to its peers.
                            stalled.push(*id);
                        }
                    }

                    for id in stalled {
                        self.clients.remove(&id);
                        warn!("Dropped client {} with saturated queue", id);
                    }
                }
            }
        }

        info!("Broadcast hub stopped");
    }
}
