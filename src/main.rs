use std::sync::Arc;

use actix_web::{get, middleware, web, App, HttpResponse, HttpServer, Responder, Result};
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::repository::database::Database;
use crate::tasks::runner::{Executor, RetryPolicy, TaskRunner};
use crate::tasks::scheduler::Scheduler;

mod api;
mod config;
mod metrics;
mod models;
mod repository;
mod tasks;
mod telemetry;

#[derive(Serialize)]
pub struct Response {
    pub message: String,
}

#[get("/health")]
async fn healthcheck() -> impl Responder {
    let response = Response {
        message: "Everything is working fine".to_string(),
    };
    HttpResponse::Ok().json(response)
}

async fn not_found() -> Result<HttpResponse> {
    let response = Response {
        message: "Resource not found".to_string(),
    };
    Ok(HttpResponse::NotFound().json(response))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    telemetry::init(env!("CARGO_PKG_NAME"));

    let db = Database::new(&config.database_url)?;
    db.initialize()?;

    let metrics = Arc::new(Metrics::new()?);
    let metrics_server = metrics::server(metrics.clone(), config.metrics_port)?;
    actix_web::rt::spawn(metrics_server);
    info!(port = config.metrics_port, "metrics listener started");

    let executor = Arc::new(Executor::new(
        db.clone(),
        metrics,
        RetryPolicy {
            max_retries: config.task_max_retries,
            base_delay: config.task_retry_base_delay,
        },
        config.due_window,
    ));
    let runner = TaskRunner::start(executor, config.task_workers);
    let scheduler = Scheduler::start(runner.queue(), config.sweep_interval);

    let db_data = web::Data::new(db);
    let queue_data = web::Data::new(runner.queue());

    info!(
        host = %config.http_host,
        port = config.http_port,
        "starting HTTP server"
    );
    HttpServer::new(move || {
        App::new()
            .app_data(db_data.clone())
            .app_data(queue_data.clone())
            .configure(api::api::config)
            .service(healthcheck)
            .default_service(web::route().to(not_found))
            .wrap(middleware::Logger::default())
    })
    .bind((config.http_host.as_str(), config.http_port))?
    .run()
    .await?;

    scheduler.stop();
    runner.shutdown();
    Ok(())
}
