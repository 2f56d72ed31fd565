//! Per-connection session state.
//!
//! A `Session` is the server half of one live WebSocket: identity from the
//! bearer token, the cached set of rooms the connection believes it is in,
//! and the bounded outbound queue its write loop drains. Producers (the hub
//! and domain operations) only ever enqueue without blocking; a full queue
//! marks the consumer as too slow to keep.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Outbound queue depth per connection. Enqueueing into a full queue gets the
/// session evicted rather than stalling the producer.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Why a non-blocking enqueue did not deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue at capacity; the session is a slow consumer.
    Full,
    /// Queue already closed; the session is shutting down.
    Closed,
}

pub struct Session {
    /// Distinguishes this connection from a later one by the same user, so a
    /// displaced session's late unregister cannot remove its successor.
    pub conn_id: u64,
    pub user_id: String,
    pub username: String,
    rooms: Mutex<HashSet<String>>,
    sender: Mutex<Option<mpsc::Sender<String>>>,
}

impl Session {
    /// Build a session plus the receiving end of its outbound queue, which
    /// the connection's write loop takes ownership of.
    pub fn new(
        user_id: String,
        username: String,
        rooms: HashSet<String>,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            user_id,
            username,
            rooms: Mutex::new(rooms),
            sender: Mutex::new(Some(tx)),
        });
        (session, rx)
    }

    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.rooms.lock().contains(room_id)
    }

    pub fn subscribe(&self, room_id: &str) {
        self.rooms.lock().insert(room_id.to_string());
    }

    pub fn unsubscribe(&self, room_id: &str) {
        self.rooms.lock().remove(room_id);
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.lock().iter().cloned().collect()
    }

    /// Non-blocking enqueue of an encoded frame.
    pub fn try_enqueue(&self, frame: String) -> Result<(), EnqueueError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue. The write loop drains whatever is already
    /// queued, observes the closed channel, and exits; later enqueues report
    /// `Closed` and the frame is dropped. Idempotent.
    pub fn close_queue(&self) {
        self.sender.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("conn_id", &self.conn_id)
            .field("user_id", &self.user_id)
            .field("rooms", &self.rooms.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
