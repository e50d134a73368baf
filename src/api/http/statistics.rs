// src/api/http/statistics.rs
// Statistics and history endpoints.

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::stats;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_HISTORY_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// GET /api/statistics
pub async fn all(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let task_statistics = state.store.all_task_stats().await?;
    let flow_statistics = state.store.all_flow_stats().await?;
    Ok(Json(json!({
        "success": true,
        "taskStatistics": task_statistics,
        "flowStatistics": flow_statistics,
    })))
}

/// GET /api/statistics/task-history/{flow_name}/{task_name}?limit=
pub async fn task_history(
    State(state): State<Arc<AppState>>,
    Path((flow_name, task_name)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let history = state.store.task_history(&flow_name, &task_name, limit).await?;
    let stats_record = state.store.get_task_stats(&flow_name, &task_name).await?;
    Ok(Json(json!({
        "history": history,
        "stats": with_stddev(stats_record),
    })))
}

/// GET /api/statistics/flow-history/{flow_name}?limit=
pub async fn flow_history(
    State(state): State<Arc<AppState>>,
    Path(flow_name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let history = state.store.flow_history(&flow_name, limit).await?;
    let stats_record = state.store.get_flow_stats(&flow_name).await?;
    Ok(Json(json!({
        "history": history,
        "stats": with_stddev(stats_record),
    })))
}

/// DELETE /api/statistics
pub async fn clear(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.store.clear_statistics().await?;
    Ok(Json(json!({ "success": true })))
}

fn with_stddev(record: Option<crate::model::StatRecord>) -> Value {
    match record {
        Some(r) => json!({
            "avgMs": r.avg_ms,
            "sampleCount": r.sample_count,
            "stddevMs": stats::stddev(r.sample_count, r.m2),
            "lastUpdated": r.last_updated,
        }),
        None => Value::Null,
    }
}
