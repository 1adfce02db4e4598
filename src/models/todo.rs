use chrono::{NaiveDate, NaiveTime};
use diesel::{AsChangeset, Associations, Identifiable, Insertable, Queryable};
use serde::{Deserialize, Serialize};

/// Who a todo belongs to: an authenticated user or an anonymous session.
/// Exactly one of the pair is ever stored on a row, and the pair is fixed at
/// creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    User(String),
    Session(String),
}

impl Owner {
    /// The (user_id, session_key) column pair for this owner.
    pub fn pair(&self) -> (Option<String>, Option<String>) {
        match self {
            Owner::User(user) => (Some(user.clone()), None),
            Owner::Session(key) => (None, Some(key.clone())),
        }
    }

    pub fn owns(&self, todo: &Todo) -> bool {
        match self {
            Owner::User(user) => todo.user_id.as_deref() == Some(user),
            Owner::Session(key) => todo.session_key.as_deref() == Some(key),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Queryable, Insertable, Identifiable)]
#[diesel(table_name = crate::repository::schema::todos)]
#[diesel(primary_key(uid))]
pub struct Todo {
    pub uid: String,
    pub user_id: Option<String>,
    pub session_key: Option<String>,
    pub todo_title: String,
    pub todo_description: String,
    pub is_done: bool,
    pub created_at: NaiveDate,
    pub updated_at: NaiveDate,
}

#[derive(
    Serialize, Deserialize, Debug, Clone, PartialEq, Queryable, Insertable, Identifiable, Associations,
)]
#[diesel(table_name = crate::repository::schema::timing_todos)]
#[diesel(primary_key(uid))]
#[diesel(belongs_to(Todo, foreign_key = todo_uid))]
pub struct TimingTodo {
    pub uid: String,
    pub todo_uid: String,
    pub schedule_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub note: Option<String>,
    pub created_at: NaiveDate,
    pub updated_at: NaiveDate,
}

/// Partial update for a todo; `None` fields are left untouched.
#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = crate::repository::schema::todos)]
pub struct TodoChanges {
    pub todo_title: Option<String>,
    pub todo_description: Option<String>,
    pub is_done: Option<bool>,
    pub updated_at: Option<NaiveDate>,
}

/// Partial update for a timing entry.
#[derive(AsChangeset, Debug, Clone, Default)]
#[diesel(table_name = crate::repository::schema::timing_todos)]
pub struct TimingTodoChanges {
    pub schedule_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub note: Option<String>,
    pub updated_at: Option<NaiveDate>,
}

/// Timing entry as exposed over the API (audit timestamps excluded).
#[derive(Serialize, Debug, Clone)]
pub struct TimingTodoData {
    pub uid: String,
    pub todo: String,
    pub schedule_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub note: Option<String>,
}

impl From<TimingTodo> for TimingTodoData {
    fn from(timing: TimingTodo) -> Self {
        Self {
            uid: timing.uid,
            todo: timing.todo_uid,
            schedule_date: timing.schedule_date,
            start_time: timing.start_time,
            end_time: timing.end_time,
            note: timing.note,
        }
    }
}

/// Todo as exposed over the API: owner session key hidden, derived slug and
/// nested timing entries included.
#[derive(Serialize, Debug, Clone)]
pub struct TodoData {
    pub uid: String,
    pub user: Option<String>,
    pub todo_title: String,
    pub slug: String,
    pub todo_description: String,
    pub is_done: bool,
    pub timingtodos: Vec<TimingTodoData>,
}

impl TodoData {
    pub fn from_parts(todo: Todo, timings: Vec<TimingTodo>) -> Self {
        Self {
            slug: slugify(&todo.todo_title),
            uid: todo.uid,
            user: todo.user_id,
            todo_title: todo.todo_title,
            todo_description: todo.todo_description,
            is_done: todo.is_done,
            timingtodos: timings.into_iter().map(TimingTodoData::from).collect(),
        }
    }
}

/// Characters a title may not contain.
pub const RESTRICTED_TITLE_CHARS: &str = "@_!#$%^&*()<>?/\\|}{~:";

/// Title rules enforced at the API boundary: more than 3 characters, none of
/// the restricted set.
pub fn validate_todo_title(title: &str) -> Result<(), String> {
    if title.chars().count() <= 3 {
        return Err("todo_title must be longer than 3 characters.".to_string());
    }
    if title.chars().any(|c| RESTRICTED_TITLE_CHARS.contains(c)) {
        return Err("todo_title cannot contain special characters.".to_string());
    }
    Ok(())
}

pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if matches!(c, ' ' | '-' | '_') && !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_titles_rejected() {
        assert!(validate_todo_title("abc").is_err());
        assert!(validate_todo_title("").is_err());
        assert!(validate_todo_title("abcd").is_ok());
    }

    #[test]
    fn special_characters_rejected() {
        for c in RESTRICTED_TITLE_CHARS.chars() {
            let title = format!("buy milk{c}");
            assert!(validate_todo_title(&title).is_err(), "expected rejection for {c:?}");
        }
        assert!(validate_todo_title("buy milk today").is_ok());
    }

    #[test]
    fn slugs_are_lowercase_hyphenated() {
        assert_eq!(slugify("Buy Milk"), "buy-milk");
        assert_eq!(slugify("  Weekly   report_2024 "), "weekly-report-2024");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn owner_pair_is_mutually_exclusive() {
        let (user, session) = Owner::User("alice".into()).pair();
        assert_eq!(user.as_deref(), Some("alice"));
        assert!(session.is_none());

        let (user, session) = Owner::Session("abc123".into()).pair();
        assert!(user.is_none());
        assert_eq!(session.as_deref(), Some("abc123"));
    }
}
