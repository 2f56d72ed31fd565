//! Storage operations the delivery core consumes.
//!
//! Backed by Postgres in production and an in-memory map in tests and
//! single-binary development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Storage failure inside a domain operation. Surfaced to the acting client
/// as an `INTERNAL_ERROR` frame, never to other sessions.
#[derive(Debug)]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        tracing::error!(?err, "database error");
        Self::new(err.to_string())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for StoreError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        tracing::error!(?err, "pool error");
        Self::new(err.to_string())
    }
}

/// A freshly appended message, read back with its server-assigned id,
/// timestamp, and the sender's username.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RoomMember {
    pub user_id: String,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Room ids the user is currently a member of.
    async fn get_memberships(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    async fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError>;

    /// Idempotent: inserting an existing membership is not an error.
    async fn add_member(&self, room_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn remove_member(&self, room_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn get_members(&self, room_id: &str) -> Result<Vec<RoomMember>, StoreError>;

    async fn append_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Advances `last_read_at` to `at` if that is later than the stored
    /// value; `last_read_at` never moves backwards, so concurrent updates
    /// converge on the maximum.
    async fn update_last_read(
        &self,
        room_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Messages in the room newer than the user's `last_read_at`, not
    /// authored by the user. Zero for non-members.
    async fn unread_count(&self, room_id: &str, user_id: &str) -> Result<i64, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests / development)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MembershipRow {
    joined_at: DateTime<Utc>,
    last_read_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    /// user_id → username
    users: HashMap<String, String>,
    /// room_id → user_id → membership
    members: HashMap<String, HashMap<String, MembershipRow>>,
    messages: Vec<StoredMessage>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users are created by the external REST surface; seed them directly.
    pub fn seed_user(&self, user_id: &str, username: &str) {
        self.inner
            .lock()
            .users
            .insert(user_id.to_string(), username.to_string());
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn get_memberships(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .members
            .iter()
            .filter(|(_, users)| users.contains_key(user_id))
            .map(|(room_id, _)| room_id.clone())
            .collect())
    }

    async fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .members
            .get(room_id)
            .is_some_and(|users| users.contains_key(user_id)))
    }

    async fn add_member(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner
            .members
            .entry(room_id.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_insert(MembershipRow {
                joined_at: now,
                last_read_at: now,
            });
        Ok(())
    }

    async fn remove_member(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(users) = inner.members.get_mut(room_id) {
            users.remove(user_id);
        }
        Ok(())
    }

    async fn get_members(&self, room_id: &str) -> Result<Vec<RoomMember>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .members
            .get(room_id)
            .map(|users| {
                users
                    .keys()
                    .map(|user_id| RoomMember {
                        user_id: user_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut inner = self.inner.lock();
        let sender_username = inner
            .users
            .get(sender_id)
            .cloned()
            .ok_or_else(|| StoreError::new(format!("unknown sender {sender_id}")))?;
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_username,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn update_last_read(
        &self,
        room_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(row) = inner
            .members
            .get_mut(room_id)
            .and_then(|users| users.get_mut(user_id))
        {
            row.last_read_at = row.last_read_at.max(at);
        }
        Ok(())
    }

    async fn unread_count(&self, room_id: &str, user_id: &str) -> Result<i64, StoreError> {
        let inner = self.inner.lock();
        let Some(row) = inner
            .members
            .get(room_id)
            .and_then(|users| users.get(user_id))
        else {
            return Ok(0);
        };
        Ok(inner
            .messages
            .iter()
            .filter(|m| {
                m.room_id == room_id && m.created_at > row.last_read_at && m.sender_id != user_id
            })
            .count() as i64)
    }
}
