//! Cross-process fan-out bus (optional).
//!
//! For horizontal scale the hub's broadcast verb is mirrored onto a pub/sub
//! channel keyed `chat:room:<room_id>`; each node's subscriber pushes
//! received frames into its local hub. The single-node reference deployment
//! bypasses this path entirely.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::gateway::hub::Hub;

pub const ROOM_CHANNEL_PREFIX: &str = "chat:room:";

pub fn room_channel(room_id: &str) -> String {
    format!("{ROOM_CHANNEL_PREFIX}{room_id}")
}

pub fn room_from_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix(ROOM_CHANNEL_PREFIX)
}

#[derive(Debug)]
pub struct BusError {
    pub message: String,
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BusError {}

/// Callback invoked with `(channel, payload)` for every received message.
pub type BusCallback = Box<dyn Fn(String, String) + Send + Sync>;

#[async_trait]
pub trait RoomBus: Send + Sync {
    /// Publish a frame to a channel. Fire-and-forget: publishing to a
    /// channel nobody listens on is not an error.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Receive messages from all room channels until the bus shuts down.
    /// Spawn as a background task.
    async fn listen(&self, callback: BusCallback) -> Result<(), BusError>;
}

/// Forward room-channel frames from the bus into the local hub's fan-out.
pub fn spawn_forwarder(bus: Arc<dyn RoomBus>, hub: Arc<Hub>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = bus
            .listen(Box::new(move |channel, payload| {
                let Some(room_id) = room_from_channel(&channel) else {
                    return;
                };
                let room_id = room_id.to_string();
                let hub = hub.clone();
                tokio::spawn(async move {
                    hub.broadcast_to_room(&room_id, payload, None).await;
                });
            }))
            .await;
        if let Err(err) = result {
            warn!(error = %err, "bus listener stopped");
        }
    })
}

// ---------------------------------------------------------------------------
// In-memory backend (single process)
// ---------------------------------------------------------------------------

const BUS_CAPACITY: usize = 1024;

/// Single-process bus over one `tokio::sync::broadcast` firehose. Useful for
/// tests and as the reference semantics for a real backend.
pub struct MemoryBus {
    tx: broadcast::Sender<(String, String)>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        // Err means no receivers; fire-and-forget.
        let _ = self.tx.send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn listen(&self, callback: BusCallback) -> Result<(), BusError> {
        let mut rx = self.tx.subscribe();
        loop {
            match rx.recv().await {
                Ok((channel, payload)) => callback(channel, payload),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "bus receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}
