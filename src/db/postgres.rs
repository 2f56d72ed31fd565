//! Postgres-backed `ChatStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{exists, select};
use diesel::prelude::*;
use diesel::sql_types::Timestamptz;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use super::pool::DbPool;
use super::schema::{messages, room_members, users};
use super::store::{ChatStore, RoomMember, StoreError, StoredMessage};
use crate::models::membership::NewMembership;
use crate::models::message::NewMessage;

diesel::define_sql_function! {
    fn greatest(a: Timestamptz, b: Timestamptz) -> Timestamptz;
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn get_memberships(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rooms = room_members::table
            .filter(room_members::user_id.eq(user_id))
            .select(room_members::room_id)
            .load(&mut conn)
            .await?;
        Ok(rooms)
    }

    async fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let member = select(exists(
            room_members::table
                .filter(room_members::room_id.eq(room_id))
                .filter(room_members::user_id.eq(user_id)),
        ))
        .get_result(&mut conn)
        .await?;
        Ok(member)
    }

    async fn add_member(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(room_members::table)
            .values(NewMembership { room_id, user_id })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_member(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::delete(
            room_members::table
                .filter(room_members::room_id.eq(room_id))
                .filter(room_members::user_id.eq(user_id)),
        )
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    async fn get_members(&self, room_id: &str) -> Result<Vec<RoomMember>, StoreError> {
        let mut conn = self.pool.get().await?;
        let user_ids: Vec<String> = room_members::table
            .filter(room_members::room_id.eq(room_id))
            .select(room_members::user_id)
            .load(&mut conn)
            .await?;
        Ok(user_ids
            .into_iter()
            .map(|user_id| RoomMember { user_id })
            .collect())
    }

    async fn append_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut conn = self.pool.get().await?;

        let sender_username: String = users::table
            .find(sender_id)
            .select(users::username)
            .get_result(&mut conn)
            .await?;

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        diesel::insert_into(messages::table)
            .values(NewMessage {
                id: &id,
                room_id,
                sender_id,
                content,
                created_at,
            })
            .execute(&mut conn)
            .await?;

        Ok(StoredMessage {
            id,
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_username,
            content: content.to_string(),
            created_at,
        })
    }

    async fn update_last_read(
        &self,
        room_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(room_members::table.find((room_id, user_id)))
            .set(room_members::last_read_at.eq(greatest(room_members::last_read_at, at)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn unread_count(&self, room_id: &str, user_id: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await?;

        let last_read: Option<DateTime<Utc>> = room_members::table
            .find((room_id, user_id))
            .select(room_members::last_read_at)
            .get_result(&mut conn)
            .await
            .optional()?;
        let Some(last_read) = last_read else {
            return Ok(0);
        };

        let count = messages::table
            .filter(messages::room_id.eq(room_id))
            .filter(messages::created_at.gt(last_read))
            .filter(messages::sender_id.ne(user_id))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }
}
