//! Process-wide router.
//!
//! The hub owns the `user_id → Session` map and serializes registration,
//! unregistration, and room broadcasts through a single consumer task, so
//! every recipient observes hub events in one total order. Producers never
//! block on a recipient: enqueues are non-blocking and a full queue evicts
//! the session (slow-consumer policy).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{Outbound, PresenceUpdate};
use super::session::{EnqueueError, Session};

/// Depth of the hub's command channel.
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// A frame to fan out to one room's subscribers.
#[derive(Debug)]
pub struct BroadcastMessage {
    pub room_id: String,
    /// Encoded frame, cloned per recipient.
    pub frame: String,
    /// `Some(user_id)` skips that user; `None` delivers to all, sender
    /// included.
    pub exclude_user_id: Option<String>,
}

enum HubCommand {
    Register(Arc<Session>),
    Unregister(Arc<Session>),
    Broadcast(BroadcastMessage),
}

pub struct Hub {
    clients: RwLock<HashMap<String, Arc<Session>>>,
    commands: mpsc::Sender<HubCommand>,
}

/// The consuming half of the hub: a single task that serializes every
/// register/unregister/broadcast. Spawn `runner.run()` exactly once.
pub struct HubRunner {
    hub: Arc<Hub>,
    commands: mpsc::Receiver<HubCommand>,
}

impl HubRunner {
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register(session) => self.hub.handle_register(session),
                HubCommand::Unregister(session) => self.hub.handle_unregister(session),
                HubCommand::Broadcast(msg) => self.hub.handle_broadcast(msg),
            }
        }
        debug!("hub command stream closed");
    }
}

impl Hub {
    /// Build the hub handle plus its consumer.
    pub fn new() -> (Arc<Self>, HubRunner) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let hub = Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            commands: tx,
        });
        let runner = HubRunner {
            hub: hub.clone(),
            commands: rx,
        };
        (hub, runner)
    }

    pub async fn register(&self, session: Arc<Session>) {
        if self.commands.send(HubCommand::Register(session)).await.is_err() {
            warn!("hub is not running; register dropped");
        }
    }

    pub async fn unregister(&self, session: Arc<Session>) {
        if self
            .commands
            .send(HubCommand::Unregister(session))
            .await
            .is_err()
        {
            warn!("hub is not running; unregister dropped");
        }
    }

    /// Queue a room fan-out. `exclude_user_id: None` delivers to everyone in
    /// the room, the sender included.
    pub async fn broadcast_to_room(&self, room_id: &str, frame: String, exclude_user_id: Option<&str>) {
        let msg = BroadcastMessage {
            room_id: room_id.to_string(),
            frame,
            exclude_user_id: exclude_user_id.map(str::to_string),
        };
        if self.commands.send(HubCommand::Broadcast(msg)).await.is_err() {
            warn!(room_id, "hub is not running; broadcast dropped");
        }
    }

    /// Point-to-point delivery to one user's live session. Dropped without
    /// eviction if the user is offline or their queue is full.
    pub fn send_to_user(&self, user_id: &str, frame: String) {
        let session = self.clients.read().get(user_id).cloned();
        if let Some(session) = session {
            if let Err(err) = session.try_enqueue(frame) {
                debug!(user_id, ?err, "point-to-point frame dropped");
            }
        }
    }

    /// Snapshot of user ids with a live session.
    pub fn online_user_ids(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Close every session's outbound queue; write loops drain and exit.
    /// Used at process shutdown. No farewell frames are sent.
    pub fn shutdown(&self) {
        let clients = self.clients.read();
        for session in clients.values() {
            session.close_queue();
        }
        info!(sessions = clients.len(), "hub shut down");
    }

    fn handle_register(&self, session: Arc<Session>) {
        let user_id = session.user_id.clone();
        let username = session.username.clone();
        let displaced = self.clients.write().insert(user_id.clone(), session);
        if let Some(old) = displaced {
            // Single-session-per-user: the newcomer wins, the old connection
            // drains and closes. Its late unregister fails the identity check
            // below, so observers see no interim offline transition.
            old.close_queue();
            info!(%user_id, old_conn = old.conn_id, "session displaced");
        }
        info!(%user_id, %username, "session registered");
        self.broadcast_presence(&user_id, &username, "online");
    }

    fn handle_unregister(&self, session: Arc<Session>) {
        let removed = {
            let mut clients = self.clients.write();
            match clients.get(&session.user_id) {
                Some(current) if current.conn_id == session.conn_id => {
                    clients.remove(&session.user_id)
                }
                _ => None,
            }
        };
        if let Some(removed) = removed {
            removed.close_queue();
            info!(user_id = %removed.user_id, "session unregistered");
            self.broadcast_presence(&removed.user_id, &removed.username, "offline");
        }
    }

    fn handle_broadcast(&self, msg: BroadcastMessage) {
        let mut evicted = Vec::new();
        {
            let clients = self.clients.read();
            for (user_id, session) in clients.iter() {
                if msg.exclude_user_id.as_deref() == Some(user_id.as_str()) {
                    continue;
                }
                if !session.is_subscribed(&msg.room_id) {
                    continue;
                }
                match session.try_enqueue(msg.frame.clone()) {
                    Ok(()) => {}
                    Err(EnqueueError::Full) => {
                        evicted.push((user_id.clone(), session.conn_id))
                    }
                    Err(EnqueueError::Closed) => {}
                }
            }
        }
        self.evict_slow_consumers(evicted);
    }

    /// Presence transitions go to every live session, not just room peers.
    fn broadcast_presence(&self, user_id: &str, username: &str, status: &str) {
        let frame = Outbound::PresenceUpdate(PresenceUpdate {
            user_id: user_id.to_string(),
            username: username.to_string(),
            status: status.to_string(),
        })
        .encode();

        let mut evicted = Vec::new();
        {
            let clients = self.clients.read();
            for (uid, session) in clients.iter() {
                match session.try_enqueue(frame.clone()) {
                    Ok(()) => {}
                    Err(EnqueueError::Full) => evicted.push((uid.clone(), session.conn_id)),
                    Err(EnqueueError::Closed) => {}
                }
            }
        }
        self.evict_slow_consumers(evicted);
    }

    fn evict_slow_consumers(&self, victims: Vec<(String, u64)>) {
        if victims.is_empty() {
            return;
        }
        let mut clients = self.clients.write();
        for (user_id, conn_id) in victims {
            let matches = clients
                .get(&user_id)
                .is_some_and(|current| current.conn_id == conn_id);
            if matches {
                if let Some(session) = clients.remove(&user_id) {
                    session.close_queue();
                    warn!(%user_id, conn_id, "slow consumer evicted");
                }
            }
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("sessions", &self.clients.read().len())
            .finish()
    }
}
