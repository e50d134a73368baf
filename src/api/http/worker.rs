// src/api/http/worker.rs
// Worker long-poll and heartbeat. Every call here is a liveness signal.

use crate::state::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/execution-requests
///
/// Long-poll: returns the next execution request within the poll timeout,
/// else null.
pub async fn poll_execution_requests(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.dispatcher.heartbeat();
    let request = state.dispatcher.poll(state.poll_timeout).await;
    Json(json!(request))
}

/// POST /api/heartbeat
pub async fn heartbeat(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.dispatcher.heartbeat();
    Json(json!({ "success": true }))
}
