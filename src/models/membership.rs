use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::room_members;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = room_members)]
pub struct Membership {
    pub room_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: DateTime<Utc>,
}

/// `joined_at` and `last_read_at` default to NOW() in the database, so a new
/// member starts with nothing unread.
#[derive(Debug, Insertable)]
#[diesel(table_name = room_members)]
pub struct NewMembership<'a> {
    pub room_id: &'a str,
    pub user_id: &'a str,
}
