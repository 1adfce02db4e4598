use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

/// Explicitly constructed metrics registry shared by the task runner and the
/// scrape listener. No process-wide statics: the instance is built in `main`
/// and handed to whoever records into it.
pub struct Metrics {
    registry: Registry,
    pub tasks_started: IntCounterVec,
    pub tasks_succeeded: IntCounterVec,
    pub tasks_failed: IntCounterVec,
    pub task_runtime_seconds: HistogramVec,
    pub reminders_created: IntCounter,
    pub due_todos_checked: IntCounter,
    pub new_due_reminders: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tasks_started = IntCounterVec::new(
            Opts::new("celery_tasks_started_total", "Total started background tasks"),
            &["task"],
        )?;
        let tasks_succeeded = IntCounterVec::new(
            Opts::new(
                "celery_tasks_succeeded_total",
                "Total background tasks that ran to completion",
            ),
            &["task"],
        )?;
        let tasks_failed = IntCounterVec::new(
            Opts::new(
                "celery_tasks_failed_total",
                "Total background tasks that ended in an unhandled error",
            ),
            &["task"],
        )?;
        let task_runtime_seconds = HistogramVec::new(
            HistogramOpts::new(
                "celery_task_runtime_seconds",
                "Background task runtime in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["task"],
        )?;
        let reminders_created = IntCounter::new(
            "todo_reminders_created_total",
            "Total number of reminders created for new todos",
        )?;
        let due_todos_checked = IntCounter::new(
            "todo_due_todos_checked_total",
            "Total number of timing entries checked for upcoming reminders",
        )?;
        let new_due_reminders = IntCounter::new(
            "todo_new_due_reminders_total",
            "Total number of new reminders created for due todos",
        )?;

        registry.register(Box::new(tasks_started.clone()))?;
        registry.register(Box::new(tasks_succeeded.clone()))?;
        registry.register(Box::new(tasks_failed.clone()))?;
        registry.register(Box::new(task_runtime_seconds.clone()))?;
        registry.register(Box::new(reminders_created.clone()))?;
        registry.register(Box::new(due_todos_checked.clone()))?;
        registry.register(Box::new(new_due_reminders.clone()))?;

        Ok(Self {
            registry,
            tasks_started,
            tasks_succeeded,
            tasks_failed,
            task_runtime_seconds,
            reminders_created,
            due_todos_checked,
            new_due_reminders,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[get("/metrics")]
async fn scrape(metrics: web::Data<Metrics>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics.render())
}

/// Build the dedicated scrape listener. Bound once per process, at bootstrap.
pub fn server(metrics: Arc<Metrics>, port: u16) -> std::io::Result<Server> {
    let data = web::Data::from(metrics);
    Ok(HttpServer::new(move || App::new().app_data(data.clone()).service(scrape))
        .bind(("0.0.0.0", port))?
        .workers(1)
        .run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;

    #[::core::prelude::v1::test]
    fn render_includes_registered_series() {
        let metrics = Metrics::new().expect("metrics");
        metrics
            .tasks_started
            .with_label_values(&["create_todo_reminder"])
            .inc();
        metrics.reminders_created.inc();

        let body = metrics.render();
        assert!(body.contains("celery_tasks_started_total{task=\"create_todo_reminder\"} 1"));
        assert!(body.contains("todo_reminders_created_total 1"));
    }

    #[actix_web::test]
    async fn scrape_endpoint_serves_text_format() {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        metrics.due_todos_checked.inc_by(3);

        let app =
            test::init_service(App::new().app_data(web::Data::from(metrics)).service(scrape)).await;
        let req = test::TestRequest::default().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        let text = std::str::from_utf8(&body).expect("utf8 body");
        assert!(text.contains("todo_due_todos_checked_total 3"));
    }
}
