use chrono::NaiveDateTime;
use diesel::{Associations, Identifiable, Insertable, Queryable};
use serde::Serialize;

use crate::models::todo::Todo;

/// Derived notification record. Only the background task runner creates
/// these; clients never write them directly, and they disappear with their
/// parent todo. Creation timestamp is a full date-time, unlike the date-only
/// audit fields on the other tables.
#[derive(Serialize, Debug, Clone, PartialEq, Queryable, Insertable, Identifiable, Associations)]
#[diesel(table_name = crate::repository::schema::reminders)]
#[diesel(primary_key(uid))]
#[diesel(belongs_to(Todo, foreign_key = todo_uid))]
pub struct Reminder {
    pub uid: String,
    pub todo_uid: String,
    pub message: String,
    pub is_sent: bool,
    pub created_at: NaiveDateTime,
}
