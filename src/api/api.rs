use std::future::{ready, Ready};

use actix_web::cookie::Cookie;
use actix_web::error::InternalError;
use actix_web::{delete, get, patch, post, put, web, FromRequest, HttpRequest, HttpResponse};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::todo::{validate_todo_title, Owner, TimingTodoData, TodoData};
use crate::repository::database::{
    Database, NewTimingInput, StoreError, TimingPatch, TodoPatch, TodoQuery, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
use crate::tasks::runner::{Task, TaskQueue};

const SESSION_COOKIE: &str = "sessionid";

/// Resolve the calling owner: an upstream-authenticated user id, else a
/// session key from header or cookie. Requests with neither are rejected.
impl FromRequest for Owner {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(owner_from_request(req))
    }
}

fn owner_from_request(req: &HttpRequest) -> Result<Owner, actix_web::Error> {
    if let Some(user) = header_value(req, "X-User-Id") {
        return Ok(Owner::User(user));
    }
    if let Some(key) = header_value(req, "X-Session-Key") {
        return Ok(Owner::Session(key));
    }
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        let key = cookie.value().trim();
        if !key.is_empty() {
            return Ok(Owner::Session(key.to_string()));
        }
    }
    let body = json!({"status": false, "message": "Authentication or session key required"});
    Err(InternalError::from_response("unauthorized", HttpResponse::Unauthorized().json(body)).into())
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    pub todo_title: String,
    pub todo_description: String,
    #[serde(default)]
    pub is_done: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateTodoRequest {
    pub todo_title: Option<String>,
    pub todo_description: Option<String>,
    pub is_done: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTimingRequest {
    pub schedule_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateTimingRequest {
    pub schedule_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTodosQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub is_done: Option<bool>,
}

fn store_error(err: StoreError) -> HttpResponse {
    tracing::error!(error = %err, "store operation failed");
    HttpResponse::InternalServerError()
        .json(json!({"status": false, "message": "Something went wrong"}))
}

fn not_found_response(message: &str) -> HttpResponse {
    HttpResponse::NotFound().json(json!({"status": false, "message": message}))
}

fn title_error(reason: String) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({
        "status": false,
        "message": "Invalid data",
        "errors": {"todo_title": [reason]},
    }))
}

async fn home(req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": 200,
        "message": "Task Track API is working",
        "method_called": format!("You called {} method", req.method()),
    }))
}

#[post("/session")]
async fn create_session() -> HttpResponse {
    let session_key = Uuid::new_v4().to_string();
    let cookie = Cookie::build(SESSION_COOKIE, session_key.clone())
        .path("/")
        .http_only(true)
        .finish();
    HttpResponse::Created().cookie(cookie).json(json!({
        "status": true,
        "message": "Session created",
        "data": {"session_key": session_key},
    }))
}

#[post("/todos")]
async fn create_todo(
    db: web::Data<Database>,
    queue: web::Data<TaskQueue>,
    owner: Owner,
    body: web::Json<CreateTodoRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    if let Err(reason) = validate_todo_title(&body.todo_title) {
        return title_error(reason);
    }
    match db.create_todo(&owner, body.todo_title, body.todo_description, body.is_done) {
        Ok(todo) => {
            // fire-and-forget: the caller's response never waits on the task
            queue.submit(Task::CreateTodoReminder {
                todo_uid: todo.uid.clone(),
            });
            HttpResponse::Created().json(json!({
                "status": true,
                "message": "Todo created successfully",
                "data": TodoData::from_parts(todo, Vec::new()),
            }))
        }
        Err(err) => store_error(err),
    }
}

#[get("/todos")]
async fn list_todos(
    db: web::Data<Database>,
    owner: Owner,
    query: web::Query<ListTodosQuery>,
) -> HttpResponse {
    let query = query.into_inner();
    let todo_query = TodoQuery {
        page: query.page.unwrap_or(1).max(1),
        page_size: query
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
        search: query.search,
        ordering: query.ordering,
        is_done: query.is_done,
    };
    match db.list_todos(&owner, &todo_query) {
        Ok(page) => {
            let results: Vec<TodoData> = page
                .results
                .into_iter()
                .map(|(todo, timings)| TodoData::from_parts(todo, timings))
                .collect();
            HttpResponse::Ok().json(json!({
                "status": true,
                "message": "Todo fetched",
                "data": {
                    "count": page.count,
                    "page": page.page,
                    "page_size": page.page_size,
                    "results": results,
                },
            }))
        }
        Err(err) => store_error(err),
    }
}

#[get("/todos/{uid}")]
async fn get_todo(db: web::Data<Database>, owner: Owner, path: web::Path<String>) -> HttpResponse {
    match db.get_todo(&owner, &path.into_inner()) {
        Ok(Some((todo, timings))) => HttpResponse::Ok().json(json!({
            "status": true,
            "message": "Todo fetched",
            "data": TodoData::from_parts(todo, timings),
        })),
        Ok(None) => not_found_response("Todo not found"),
        Err(err) => store_error(err),
    }
}

fn apply_todo_update(
    db: &Database,
    owner: &Owner,
    todo_uid: &str,
    body: UpdateTodoRequest,
) -> HttpResponse {
    if let Some(title) = &body.todo_title {
        if let Err(reason) = validate_todo_title(title) {
            return title_error(reason);
        }
    }
    let patch = TodoPatch {
        todo_title: body.todo_title,
        todo_description: body.todo_description,
        is_done: body.is_done,
    };
    match db.update_todo(owner, todo_uid, patch) {
        Ok(Some((todo, timings))) => HttpResponse::Ok().json(json!({
            "status": true,
            "message": "Todo updated successfully",
            "data": TodoData::from_parts(todo, timings),
        })),
        Ok(None) => not_found_response("Todo not found"),
        Err(err) => store_error(err),
    }
}

#[patch("/todos/{uid}")]
async fn update_todo(
    db: web::Data<Database>,
    owner: Owner,
    path: web::Path<String>,
    body: web::Json<UpdateTodoRequest>,
) -> HttpResponse {
    apply_todo_update(&db, &owner, &path.into_inner(), body.into_inner())
}

#[put("/todos/{uid}")]
async fn replace_todo(
    db: web::Data<Database>,
    owner: Owner,
    path: web::Path<String>,
    body: web::Json<UpdateTodoRequest>,
) -> HttpResponse {
    apply_todo_update(&db, &owner, &path.into_inner(), body.into_inner())
}

#[delete("/todos/{uid}")]
async fn delete_todo(
    db: web::Data<Database>,
    owner: Owner,
    path: web::Path<String>,
) -> HttpResponse {
    match db.delete_todo(&owner, &path.into_inner()) {
        Ok(true) => HttpResponse::Ok().json(json!({
            "status": true,
            "message": "Todo deleted successfully",
        })),
        Ok(false) => not_found_response("Todo not found"),
        Err(err) => store_error(err),
    }
}

#[get("/todos/{uid}/timings")]
async fn list_timings(
    db: web::Data<Database>,
    owner: Owner,
    path: web::Path<String>,
) -> HttpResponse {
    match db.get_todo(&owner, &path.into_inner()) {
        Ok(Some((todo, timings))) => {
            let data: Vec<TimingTodoData> =
                timings.into_iter().map(TimingTodoData::from).collect();
            HttpResponse::Ok().json(json!({
                "status": true,
                "message": format!("Timing entries for Todo: {}", todo.todo_title),
                "data": data,
            }))
        }
        Ok(None) => not_found_response("Todo not found"),
        Err(err) => store_error(err),
    }
}

#[post("/todos/{uid}/timings")]
async fn add_timing(
    db: web::Data<Database>,
    owner: Owner,
    path: web::Path<String>,
    body: web::Json<CreateTimingRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let input = NewTimingInput {
        schedule_date: body.schedule_date,
        start_time: body.start_time,
        end_time: body.end_time,
        note: body.note,
    };
    match db.add_timing(&owner, &path.into_inner(), input) {
        Ok(Some(timing)) => HttpResponse::Created().json(json!({
            "status": true,
            "message": "TimingTodo created successfully",
            "data": TimingTodoData::from(timing),
        })),
        Ok(None) => not_found_response("Todo not found"),
        Err(err) => store_error(err),
    }
}

#[patch("/timings/{uid}")]
async fn update_timing(
    db: web::Data<Database>,
    owner: Owner,
    path: web::Path<String>,
    body: web::Json<UpdateTimingRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let patch = TimingPatch {
        schedule_date: body.schedule_date,
        start_time: body.start_time,
        end_time: body.end_time,
        note: body.note,
    };
    match db.update_timing(&owner, &path.into_inner(), patch) {
        Ok(Some(timing)) => HttpResponse::Ok().json(json!({
            "status": true,
            "message": "TimingTodo updated successfully",
            "data": TimingTodoData::from(timing),
        })),
        Ok(None) => not_found_response("TimingTodo not found"),
        Err(err) => store_error(err),
    }
}

#[delete("/timings/{uid}")]
async fn delete_timing(
    db: web::Data<Database>,
    owner: Owner,
    path: web::Path<String>,
) -> HttpResponse {
    match db.delete_timing(&owner, &path.into_inner()) {
        Ok(true) => HttpResponse::Ok().json(json!({
            "status": true,
            "message": "TimingTodo deleted successfully",
        })),
        Ok(false) => not_found_response("TimingTodo not found"),
        Err(err) => store_error(err),
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/")
                    .route(web::get().to(home))
                    .route(web::post().to(home))
                    .route(web::patch().to(home)),
            )
            .service(create_session)
            .service(create_todo)
            .service(list_todos)
            .service(get_todo)
            .service(update_todo)
            .service(replace_todo)
            .service(delete_todo)
            .service(list_timings)
            .service(add_timing)
            .service(update_timing)
            .service(delete_timing),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::repository::database::test_support::test_db;
    use crate::tasks::runner::{Executor, RetryPolicy, TaskRunner};
    use actix_web::http::StatusCode;
    use actix_web::test::{self, TestRequest};
    use actix_web::App;
    use std::sync::Arc;

    fn app_parts(db: &Database) -> (TaskRunner, web::Data<Database>, web::Data<TaskQueue>) {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let executor = Arc::new(Executor::new(
            db.clone(),
            metrics,
            RetryPolicy::default(),
            chrono::Duration::minutes(15),
        ));
        let runner = TaskRunner::start(executor, 1);
        let queue = web::Data::new(runner.queue());
        (runner, web::Data::new(db.clone()), queue)
    }

    #[actix_web::test]
    async fn creating_a_todo_enqueues_a_reminder() {
        let (db, _dir) = test_db();
        let (runner, db_data, queue_data) = app_parts(&db);
        let app = test::init_service(
            App::new()
                .app_data(db_data)
                .app_data(queue_data)
                .configure(config),
        )
        .await;

        let req = TestRequest::post()
            .uri("/api/v1/todos")
            .insert_header(("X-User-Id", "alice"))
            .set_json(serde_json::json!({
                "todo_title": "Water plants",
                "todo_description": "balcony first",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], true);
        assert_eq!(body["data"]["slug"], "water-plants");
        let uid = body["data"]["uid"].as_str().expect("uid").to_string();

        // drop the app (and its queue handle) so shutdown can drain
        drop(app);
        runner.shutdown();

        let reminders = db.reminders_for_todo(&uid).expect("reminders");
        assert_eq!(reminders.len(), 1);
        assert_eq!(
            reminders[0].message,
            "Background reminder: Todo 'Water plants' created"
        );
    }

    #[actix_web::test]
    async fn invalid_titles_are_rejected_with_field_errors() {
        let (db, _dir) = test_db();
        let (_runner, db_data, queue_data) = app_parts(&db);
        let app = test::init_service(
            App::new()
                .app_data(db_data)
                .app_data(queue_data)
                .configure(config),
        )
        .await;

        for title in ["abc", "bad:title"] {
            let req = TestRequest::post()
                .uri("/api/v1/todos")
                .insert_header(("X-User-Id", "alice"))
                .set_json(serde_json::json!({
                    "todo_title": title,
                    "todo_description": "whatever",
                }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "title {title:?}");
            let body: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(body["status"], false);
            assert!(body["errors"]["todo_title"].is_array());
        }
    }

    #[actix_web::test]
    async fn requests_without_an_owner_are_unauthorized() {
        let (db, _dir) = test_db();
        let (_runner, db_data, queue_data) = app_parts(&db);
        let app = test::init_service(
            App::new()
                .app_data(db_data)
                .app_data(queue_data)
                .configure(config),
        )
        .await;

        let req = TestRequest::get().uri("/api/v1/todos").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn owners_only_see_their_own_todos() {
        let (db, _dir) = test_db();
        let (_runner, db_data, queue_data) = app_parts(&db);
        let app = test::init_service(
            App::new()
                .app_data(db_data)
                .app_data(queue_data)
                .configure(config),
        )
        .await;

        let create = TestRequest::post()
            .uri("/api/v1/todos")
            .insert_header(("X-User-Id", "alice"))
            .set_json(serde_json::json!({
                "todo_title": "Alice's errand",
                "todo_description": "private",
            }))
            .to_request();
        let resp = test::call_service(&app, create).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let uid = body["data"]["uid"].as_str().expect("uid").to_string();

        // another user sees an empty list and a 404 on detail
        let list = TestRequest::get()
            .uri("/api/v1/todos")
            .insert_header(("X-User-Id", "mallory"))
            .to_request();
        let resp = test::call_service(&app, list).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["count"], 0);

        let detail = TestRequest::get()
            .uri(&format!("/api/v1/todos/{uid}"))
            .insert_header(("X-User-Id", "mallory"))
            .to_request();
        let resp = test::call_service(&app, detail).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // a session owner from a cookie is scoped the same way
        let session_list = TestRequest::get()
            .uri("/api/v1/todos")
            .cookie(Cookie::new(SESSION_COOKIE, "sess-42"))
            .to_request();
        let resp = test::call_service(&app, session_list).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["count"], 0);
    }

    #[actix_web::test]
    async fn timings_nest_under_their_todo() {
        let (db, _dir) = test_db();
        let (_runner, db_data, queue_data) = app_parts(&db);
        let app = test::init_service(
            App::new()
                .app_data(db_data)
                .app_data(queue_data)
                .configure(config),
        )
        .await;

        let create = TestRequest::post()
            .uri("/api/v1/todos")
            .insert_header(("X-Session-Key", "sess-9"))
            .set_json(serde_json::json!({
                "todo_title": "Plan sprint",
                "todo_description": "with the team",
            }))
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, create).await).await;
        let uid = body["data"]["uid"].as_str().expect("uid").to_string();

        let add = TestRequest::post()
            .uri(&format!("/api/v1/todos/{uid}/timings"))
            .insert_header(("X-Session-Key", "sess-9"))
            .set_json(serde_json::json!({
                "schedule_date": "2026-08-10",
                "start_time": "09:30:00",
                "note": "war room",
            }))
            .to_request();
        let resp = test::call_service(&app, add).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let detail = TestRequest::get()
            .uri(&format!("/api/v1/todos/{uid}"))
            .insert_header(("X-Session-Key", "sess-9"))
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, detail).await).await;
        assert_eq!(body["data"]["timingtodos"].as_array().expect("array").len(), 1);
        assert_eq!(body["data"]["timingtodos"][0]["note"], "war room");

        let listing = TestRequest::get()
            .uri(&format!("/api/v1/todos/{uid}/timings"))
            .insert_header(("X-Session-Key", "sess-9"))
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, listing).await).await;
        assert_eq!(body["message"], "Timing entries for Todo: Plan sprint");
        assert_eq!(body["data"].as_array().expect("array").len(), 1);
    }

    #[actix_web::test]
    async fn page_size_is_capped() {
        let (db, _dir) = test_db();
        let (_runner, db_data, queue_data) = app_parts(&db);
        let app = test::init_service(
            App::new()
                .app_data(db_data)
                .app_data(queue_data)
                .configure(config),
        )
        .await;

        let req = TestRequest::get()
            .uri("/api/v1/todos?page_size=5000")
            .insert_header(("X-User-Id", "alice"))
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["data"]["page_size"], MAX_PAGE_SIZE);
    }

    #[actix_web::test]
    async fn session_endpoint_issues_a_key_and_cookie() {
        let (db, _dir) = test_db();
        let (_runner, db_data, queue_data) = app_parts(&db);
        let app = test::init_service(
            App::new()
                .app_data(db_data)
                .app_data(queue_data)
                .configure(config),
        )
        .await;

        let req = TestRequest::post().uri("/api/v1/session").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let cookie_value = resp
            .response()
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .expect("session cookie");
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["session_key"], cookie_value);
    }
}
