// src/api/http/mod.rs
// Route table binding the HTTP surface to the engine, dispatcher, and
// supervisor.

pub mod client;
pub mod engine;
pub mod statistics;
pub mod worker;

use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir};

pub fn build_router(state: Arc<AppState>, reports_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(crate::metrics::metrics_handler))
        // Worker-process supervision
        .route("/api/client/configs", get(client::list_configs))
        .route("/api/client/status", get(client::status))
        .route("/api/client/start", post(client::start))
        .route("/api/client/stop", post(client::stop))
        // Flow/run surface
        .route("/api/engine/register", post(engine::register_flow))
        .route("/api/flows", post(engine::register_flow))
        .route("/api/engine/flows", get(engine::list_flows))
        .route("/api/engine/runs", get(engine::list_runs))
        .route("/api/engine/runs/{run_id}", get(engine::get_run))
        .route("/api/engine/trigger/{flow_id}", post(engine::trigger))
        .route("/api/engine/run/{flow_id}", post(engine::create_run))
        .route(
            "/api/runs/{run_id}/tasks/{task_index}/state",
            post(engine::update_task_state),
        )
        .route(
            "/api/runs/{run_id}/tasks/{task_index}/logs",
            post(engine::append_task_log),
        )
        .route("/api/runs/{run_id}/complete", post(engine::complete))
        .route("/api/runs/{run_id}", delete(engine::delete_run))
        .route("/api/engine/runs/{run_id}/logs", post(engine::append_log))
        .route("/api/flows/{run_id}/logs", post(engine::append_log))
        // Worker poll and heartbeat
        .route(
            "/api/execution-requests",
            get(worker::poll_execution_requests),
        )
        .route("/api/heartbeat", post(worker::heartbeat))
        // Statistics
        .route(
            "/api/statistics",
            get(statistics::all).delete(statistics::clear),
        )
        .route(
            "/api/statistics/task-history/{flow_name}/{task_name}",
            get(statistics::task_history),
        )
        .route(
            "/api/statistics/flow-history/{flow_name}",
            get(statistics::flow_history),
        )
        // Static reports, served read-only
        .nest_service("/reports", ServeDir::new(reports_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health - returns 200 when the database answers.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1")
        .fetch_one(&state.store.pool)
        .await
        .is_ok();

    let body = Json(json!({
        "status": if db_ok { "healthy" } else { "unhealthy" },
        "db": if db_ok { "ok" } else { "error" },
    }));

    if db_ok {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}
