// src/api/http/engine.rs
// Flow and run endpoints.

use crate::api::error::ApiError;
use crate::engine::{RegisterFlowPayload, TaskStateUpdate};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    #[serde(default)]
    pub configuration: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBody {
    pub task_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct LogBody {
    pub log: String,
}

/// POST /api/engine/register (alias POST /api/flows)
pub async fn register_flow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterFlowPayload>,
) -> Result<Json<Value>, ApiError> {
    let auto_trigger = payload.auto_trigger;
    let auto_config = payload.auto_trigger_config.clone();

    let flow = state.engine.register_flow(payload).await?;

    let mut body = json!({ "success": true, "flow": flow });
    if auto_trigger {
        let run_id = state
            .engine
            .trigger_flow(
                &flow.id,
                auto_config.as_deref().unwrap_or("default"),
                None,
                None,
            )
            .await?;
        body["runId"] = json!(run_id);
    }
    Ok(Json(body))
}

/// GET /api/engine/flows
pub async fn list_flows(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.engine.flows().await))
}

/// GET /api/engine/runs - newest start time first
pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.engine.runs().await))
}

/// GET /api/engine/runs/{run_id}
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.engine.run(&run_id).await {
        Some(run) => Ok(Json(json!(run))),
        None => Err(ApiError::not_found(format!("run {}", run_id))),
    }
}

/// POST /api/engine/trigger/{flow_id} - creates a run and dispatches it
pub async fn trigger(
    State(state): State<Arc<AppState>>,
    Path(flow_id): Path<String>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    // Callers may POST an empty body; every field is optional anyway.
    let body: TriggerBody = serde_json::from_str(&body).unwrap_or_default();
    let run_id = state
        .engine
        .trigger_flow(
            &flow_id,
            body.configuration.as_deref().unwrap_or("default"),
            body.color,
            body.name,
        )
        .await?;
    Ok(Json(json!({ "success": true, "runId": run_id })))
}

/// POST /api/engine/run/{flow_id} - creates a run without dispatching
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Path(flow_id): Path<String>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let body: TriggerBody = serde_json::from_str(&body).unwrap_or_default();
    let run_id = state
        .engine
        .create_run(
            &flow_id,
            body.configuration.as_deref().unwrap_or("default"),
            body.color,
            body.name,
        )
        .await?;
    Ok(Json(json!({ "success": true, "runId": run_id })))
}

/// POST /api/runs/{run_id}/tasks/{task_index}/state
///
/// Updates targeting a terminal slot are ignored, not errors: the response
/// stays 200 so a lagging worker is not disturbed.
pub async fn update_task_state(
    State(state): State<Arc<AppState>>,
    Path((run_id, task_index)): Path<(String, usize)>,
    Json(update): Json<TaskStateUpdate>,
) -> Result<Json<Value>, ApiError> {
    state
        .engine
        .update_task_state(&run_id, task_index, update)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/runs/{run_id}/tasks/{task_index}/logs
pub async fn append_task_log(
    State(state): State<Arc<AppState>>,
    Path((run_id, task_index)): Path<(String, usize)>,
    Json(body): Json<LogBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .engine
        .append_task_log(&run_id, task_index, &body.log)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/runs/{run_id}/complete
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<Value>, ApiError> {
    state.engine.complete_flow(&run_id, body.task_count).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/engine/runs/{run_id}/logs (alias POST /api/flows/{run_id}/logs)
pub async fn append_log(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(body): Json<LogBody>,
) -> Result<Json<Value>, ApiError> {
    state.engine.append_run_log(&run_id, &body.log).await?;
    Ok(Json(json!({ "success": true })))
}

/// DELETE /api/runs/{run_id} - 404 for unknown or still-active runs
pub async fn delete_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .engine
        .delete_run(&run_id)
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(Json(json!({ "success": true })))
}
