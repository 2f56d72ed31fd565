use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::messages;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub room_id: &'a str,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
}
