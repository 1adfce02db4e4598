use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::{Sqlite, SqliteConnection};
use thiserror::Error;
use uuid::Uuid;

use crate::models::reminder::Reminder;
use crate::models::todo::{Owner, TimingTodo, TimingTodoChanges, Todo, TodoChanges};
use crate::repository::schema::{reminders, timing_todos, todos};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
type SqlitePooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool: {0}")]
    Pool(String),
    #[error("query: {0}")]
    Query(#[from] diesel::result::Error),
}

/// Idempotent schema bootstrap, applied at startup. The UNIQUE constraint on
/// (todo_uid, message) is what makes concurrent reminder sweeps safe; the
/// CHECK keeps the ownership pair mutually exclusive.
const DDL: &str = "
CREATE TABLE IF NOT EXISTS todos (
    uid TEXT PRIMARY KEY NOT NULL,
    user_id TEXT,
    session_key TEXT,
    todo_title TEXT NOT NULL,
    todo_description TEXT NOT NULL,
    is_done BOOLEAN NOT NULL DEFAULT 0,
    created_at DATE NOT NULL,
    updated_at DATE NOT NULL,
    CHECK ((user_id IS NULL) <> (session_key IS NULL))
);
CREATE TABLE IF NOT EXISTS timing_todos (
    uid TEXT PRIMARY KEY NOT NULL,
    todo_uid TEXT NOT NULL REFERENCES todos(uid) ON DELETE CASCADE,
    schedule_date DATE NOT NULL,
    start_time TIME,
    end_time TIME,
    note TEXT,
    created_at DATE NOT NULL,
    updated_at DATE NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_timing_todos_schedule ON timing_todos (schedule_date);
CREATE TABLE IF NOT EXISTS reminders (
    uid TEXT PRIMARY KEY NOT NULL,
    todo_uid TEXT NOT NULL REFERENCES todos(uid) ON DELETE CASCADE,
    message TEXT NOT NULL,
    is_sent BOOLEAN NOT NULL DEFAULT 0,
    created_at TIMESTAMP NOT NULL,
    UNIQUE (todo_uid, message)
);
";

#[derive(Debug, Clone, Copy)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Listing parameters for owned todos.
#[derive(Debug, Clone)]
pub struct TodoQuery {
    pub page: i64,
    pub page_size: i64,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub is_done: Option<bool>,
}

impl Default for TodoQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            search: None,
            ordering: None,
            is_done: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub count: i64,
    pub page: i64,
    pub page_size: i64,
    pub results: Vec<T>,
}

/// Partial-update fields accepted from the API; timestamps stay a repository
/// concern.
#[derive(Debug, Clone, Default)]
pub struct TodoPatch {
    pub todo_title: Option<String>,
    pub todo_description: Option<String>,
    pub is_done: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewTimingInput {
    pub schedule_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TimingPatch {
    pub schedule_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub note: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        Ok(Database { pool })
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn()?.batch_execute(DDL)?;
        Ok(())
    }

    fn conn(&self) -> Result<SqlitePooledConnection, StoreError> {
        self.pool.get().map_err(|e| StoreError::Pool(e.to_string()))
    }

    fn owned_todos(owner: &Owner, query: &TodoQuery) -> todos::BoxedQuery<'static, Sqlite> {
        let mut q = todos::table.into_boxed();
        q = match owner {
            Owner::User(user) => q.filter(todos::user_id.eq(user.clone())),
            Owner::Session(key) => q.filter(todos::session_key.eq(key.clone())),
        };
        if let Some(done) = query.is_done {
            q = q.filter(todos::is_done.eq(done));
        }
        if let Some(term) = &query.search {
            let pattern = format!("%{term}%");
            q = q.filter(
                todos::todo_title
                    .like(pattern.clone())
                    .or(todos::todo_description.like(pattern)),
            );
        }
        q
    }

    pub fn create_todo(
        &self,
        owner: &Owner,
        title: String,
        description: String,
        done: bool,
    ) -> Result<Todo, StoreError> {
        let today = Utc::now().date_naive();
        let (user_id, session_key) = owner.pair();
        let todo = Todo {
            uid: Uuid::new_v4().to_string(),
            user_id,
            session_key,
            todo_title: title,
            todo_description: description,
            is_done: done,
            created_at: today,
            updated_at: today,
        };
        diesel::insert_into(todos::table)
            .values(&todo)
            .execute(&mut self.conn()?)?;
        Ok(todo)
    }

    pub fn list_todos(
        &self,
        owner: &Owner,
        query: &TodoQuery,
    ) -> Result<Page<(Todo, Vec<TimingTodo>)>, StoreError> {
        let conn = &mut self.conn()?;

        let count: i64 = Self::owned_todos(owner, query).count().get_result(conn)?;

        let mut q = Self::owned_todos(owner, query);
        q = match query.ordering.as_deref() {
            Some("created_at") => q.order(todos::created_at.asc()),
            Some("updated_at") => q.order(todos::updated_at.asc()),
            Some("-updated_at") => q.order(todos::updated_at.desc()),
            Some("todo_title") => q.order(todos::todo_title.asc()),
            Some("-todo_title") => q.order(todos::todo_title.desc()),
            // "-created_at" and anything unrecognised: newest first
            _ => q.order(todos::created_at.desc()),
        };
        let offset = (query.page - 1).max(0) * query.page_size;
        let parents: Vec<Todo> = q.offset(offset).limit(query.page_size).load(conn)?;

        let timings: Vec<TimingTodo> = TimingTodo::belonging_to(&parents)
            .order(timing_todos::schedule_date.asc())
            .load(conn)?;
        let grouped = timings.grouped_by(&parents);

        Ok(Page {
            count,
            page: query.page,
            page_size: query.page_size,
            results: parents.into_iter().zip(grouped).collect(),
        })
    }

    pub fn get_todo(
        &self,
        owner: &Owner,
        todo_uid: &str,
    ) -> Result<Option<(Todo, Vec<TimingTodo>)>, StoreError> {
        let conn = &mut self.conn()?;
        let found = todos::table
            .find(todo_uid.to_string())
            .first::<Todo>(conn)
            .optional()?
            .filter(|todo| owner.owns(todo));
        match found {
            Some(todo) => {
                let timings = TimingTodo::belonging_to(&todo)
                    .order(timing_todos::schedule_date.asc())
                    .load(conn)?;
                Ok(Some((todo, timings)))
            }
            None => Ok(None),
        }
    }

    pub fn update_todo(
        &self,
        owner: &Owner,
        todo_uid: &str,
        patch: TodoPatch,
    ) -> Result<Option<(Todo, Vec<TimingTodo>)>, StoreError> {
        if self.get_todo(owner, todo_uid)?.is_none() {
            return Ok(None);
        }
        let changes = TodoChanges {
            todo_title: patch.todo_title,
            todo_description: patch.todo_description,
            is_done: patch.is_done,
            updated_at: Some(Utc::now().date_naive()),
        };
        diesel::update(todos::table.find(todo_uid.to_string()))
            .set(&changes)
            .execute(&mut self.conn()?)?;
        self.get_todo(owner, todo_uid)
    }

    pub fn delete_todo(&self, owner: &Owner, todo_uid: &str) -> Result<bool, StoreError> {
        if self.get_todo(owner, todo_uid)?.is_none() {
            return Ok(false);
        }
        let deleted = diesel::delete(todos::table.find(todo_uid.to_string()))
            .execute(&mut self.conn()?)?;
        Ok(deleted > 0)
    }

    pub fn add_timing(
        &self,
        owner: &Owner,
        todo_uid: &str,
        input: NewTimingInput,
    ) -> Result<Option<TimingTodo>, StoreError> {
        if self.get_todo(owner, todo_uid)?.is_none() {
            return Ok(None);
        }
        let today = Utc::now().date_naive();
        let timing = TimingTodo {
            uid: Uuid::new_v4().to_string(),
            todo_uid: todo_uid.to_string(),
            schedule_date: input.schedule_date,
            start_time: input.start_time,
            end_time: input.end_time,
            note: input.note,
            created_at: today,
            updated_at: today,
        };
        diesel::insert_into(timing_todos::table)
            .values(&timing)
            .execute(&mut self.conn()?)?;
        Ok(Some(timing))
    }

    /// Load one timing entry together with its parent, gated on ownership of
    /// the parent todo.
    fn owned_timing(
        &self,
        owner: &Owner,
        timing_uid: &str,
    ) -> Result<Option<TimingTodo>, StoreError> {
        let conn = &mut self.conn()?;
        let row: Option<(TimingTodo, Todo)> = timing_todos::table
            .inner_join(todos::table)
            .filter(timing_todos::uid.eq(timing_uid.to_string()))
            .first(conn)
            .optional()?;
        Ok(row.and_then(|(timing, todo)| owner.owns(&todo).then_some(timing)))
    }

    pub fn update_timing(
        &self,
        owner: &Owner,
        timing_uid: &str,
        patch: TimingPatch,
    ) -> Result<Option<TimingTodo>, StoreError> {
        if self.owned_timing(owner, timing_uid)?.is_none() {
            return Ok(None);
        }
        let changes = TimingTodoChanges {
            schedule_date: patch.schedule_date,
            start_time: patch.start_time,
            end_time: patch.end_time,
            note: patch.note,
            updated_at: Some(Utc::now().date_naive()),
        };
        diesel::update(timing_todos::table.find(timing_uid.to_string()))
            .set(&changes)
            .execute(&mut self.conn()?)?;
        self.owned_timing(owner, timing_uid)
    }

    pub fn delete_timing(&self, owner: &Owner, timing_uid: &str) -> Result<bool, StoreError> {
        if self.owned_timing(owner, timing_uid)?.is_none() {
            return Ok(false);
        }
        let deleted = diesel::delete(timing_todos::table.find(timing_uid.to_string()))
            .execute(&mut self.conn()?)?;
        Ok(deleted > 0)
    }

    // --- task-runner facing operations; workers act for the system, so no
    // --- ownership scoping here

    pub fn find_todo(&self, todo_uid: &str) -> Result<Option<Todo>, StoreError> {
        Ok(todos::table
            .find(todo_uid.to_string())
            .first::<Todo>(&mut self.conn()?)
            .optional()?)
    }

    pub fn insert_reminder(&self, todo_uid: &str, message: &str) -> Result<Reminder, StoreError> {
        let reminder = Reminder {
            uid: Uuid::new_v4().to_string(),
            todo_uid: todo_uid.to_string(),
            message: message.to_string(),
            is_sent: false,
            created_at: Utc::now().naive_utc(),
        };
        diesel::insert_into(reminders::table)
            .values(&reminder)
            .execute(&mut self.conn()?)?;
        Ok(reminder)
    }

    /// Insert a reminder unless one with the same (todo, message) pair
    /// already exists. The UNIQUE constraint makes the check-and-insert
    /// atomic under concurrent sweeps. Returns the row and whether it was
    /// newly created.
    pub fn get_or_create_reminder(
        &self,
        todo_uid: &str,
        message: &str,
    ) -> Result<(Reminder, bool), StoreError> {
        let conn = &mut self.conn()?;
        let reminder = Reminder {
            uid: Uuid::new_v4().to_string(),
            todo_uid: todo_uid.to_string(),
            message: message.to_string(),
            is_sent: false,
            created_at: Utc::now().naive_utc(),
        };
        let inserted = diesel::insert_into(reminders::table)
            .values(&reminder)
            .on_conflict_do_nothing()
            .execute(conn)?;
        if inserted > 0 {
            return Ok((reminder, true));
        }
        let existing = reminders::table
            .filter(reminders::todo_uid.eq(todo_uid))
            .filter(reminders::message.eq(message))
            .first::<Reminder>(conn)?;
        Ok((existing, false))
    }

    /// Timing entries whose derived due instant (schedule date + start time)
    /// falls inside [window_start, window_end). Entries without a start time
    /// never match.
    pub fn due_timings(
        &self,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Result<Vec<(TimingTodo, Todo)>, StoreError> {
        let conn = &mut self.conn()?;
        let candidates: Vec<(TimingTodo, Todo)> = timing_todos::table
            .inner_join(todos::table)
            .filter(timing_todos::schedule_date.ge(window_start.date()))
            .filter(timing_todos::schedule_date.le(window_end.date()))
            .filter(timing_todos::start_time.is_not_null())
            .load(conn)?;
        Ok(candidates
            .into_iter()
            .filter(|(timing, _)| {
                timing
                    .start_time
                    .map(|start| {
                        let due = timing.schedule_date.and_time(start);
                        due >= window_start && due < window_end
                    })
                    .unwrap_or(false)
            })
            .collect())
    }

    pub fn reminders_for_todo(&self, todo_uid: &str) -> Result<Vec<Reminder>, StoreError> {
        Ok(reminders::table
            .filter(reminders::todo_uid.eq(todo_uid))
            .order(reminders::created_at.asc())
            .load(&mut self.conn()?)?)
    }
}

#[cfg(test)]
impl Database {
    /// Run raw SQL; lets tests break the schema to provoke query errors.
    pub fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        self.conn()?.batch_execute(sql)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::Database;

    /// Fresh tempfile-backed database with the schema applied. Keep the
    /// returned directory alive for the duration of the test.
    pub fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().expect("utf8 path")).expect("database");
        db.initialize().expect("schema");
        (db, dir)
    }
}
