// src/api/http/client.rs
// Worker-process supervision endpoints.

use crate::api::error::ApiError;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub client_id: String,
}

/// GET /api/client/configs
pub async fn list_configs(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let configs = state.supervisor.load_configs().await?;
    Ok(Json(json!(configs)))
}

/// GET /api/client/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.supervisor.status()))
}

/// POST /api/client/start
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .supervisor
        .start(&body.client_id)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/client/stop
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.supervisor.stop().await;
    Json(json!({ "success": true }))
}
