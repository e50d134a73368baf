// src/model/mod.rs
// Core entities: flow definitions, runs, task slots, statistics records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle state shared by runs and task slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    /// Case-insensitive parse; workers send "RUNNING", the UI sends "running".
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(RunState::Pending),
            "running" => Some(RunState::Running),
            "completed" => Some(RunState::Completed),
            "failed" => Some(RunState::Failed),
            _ => None,
        }
    }

    /// Completed and Failed are irreversible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Severity of a performance warning. The engine only ever emits `Warning`;
/// `Critical` exists for the report surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Warning,
    Critical,
}

/// Informational slow-task flag. Never changes flow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceWarning {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: WarningSeverity,
    pub message: String,
}

impl PerformanceWarning {
    pub fn slow(message: String) -> Self {
        Self {
            kind: "slow".to_string(),
            severity: WarningSeverity::Warning,
            message,
        }
    }
}

/// One task position inside a registered flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,
    /// Expected duration in milliseconds, always > 0.
    #[serde(rename = "estimatedTime")]
    pub estimated_ms: i64,
    /// Share of the flow's total work, in [0,1]. Sums to 1 across the flow.
    pub weight: f64,
    pub crucial_pass: bool,
}

/// A named, ordered task list registered by a worker. Single-shot:
/// triggering a run consumes the definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
    pub tasks: Vec<TaskDefinition>,
    pub created_at: DateTime<Utc>,
}

/// Timestamped log line attached to a run or task slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Typed task outcome reported by the worker. The table is free-form rows,
/// persisted as an opaque JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub passed: bool,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub table: Vec<BTreeMap<String, serde_json::Value>>,
}

/// One slot in a run's task sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: String,
    pub name: String,
    pub state: RunState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub weight: f64,
    #[serde(rename = "estimatedTime")]
    pub estimated_ms: i64,
    pub progress: f64,
    pub result: Option<TaskResult>,
    pub performance_warning: Option<PerformanceWarning>,
    pub crucial_pass: bool,
    pub logs: Vec<LogEntry>,
}

impl TaskRun {
    pub fn pending(name: impl Into<String>, estimated_ms: i64, crucial_pass: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            state: RunState::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            weight: 0.0,
            estimated_ms,
            progress: 0.0,
            result: None,
            performance_warning: None,
            crucial_pass,
            logs: Vec::new(),
        }
    }
}

/// One execution instance of a flow. `flow_name` is denormalized so the run
/// survives deletion of its originating definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRun {
    pub id: String,
    pub flow_id: String,
    pub flow_name: String,
    pub state: RunState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub configuration: String,
    pub tags: BTreeMap<String, String>,
    pub tasks: Vec<TaskRun>,
    pub progress: f64,
    pub client_color: Option<String>,
    pub client_name: Option<String>,
    pub report_path: Option<String>,
    pub logs: Vec<LogEntry>,
}

/// Welford accumulator row, keyed by (flow, task) or flow alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRecord {
    pub avg_ms: f64,
    pub sample_count: i64,
    pub m2: f64,
    pub last_updated: DateTime<Utc>,
}

/// Per-(flow,task) statistics with identifying keys, for the API surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatsEntry {
    pub flow_name: String,
    pub task_name: String,
    #[serde(flatten)]
    pub stats: StatRecord,
    pub stddev_ms: f64,
}

/// Per-flow statistics with the flow key, for the API surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatsEntry {
    pub flow_name: String,
    #[serde(flatten)]
    pub stats: StatRecord,
    pub stddev_ms: f64,
}

/// A completed duration sample from run history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySample {
    pub duration_ms: i64,
    pub ended_at: DateTime<Utc>,
}

/// Request handed to the worker through the long-poll channel. Snake_case on
/// the wire, matching the worker protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub run_id: String,
    pub flow_name: String,
    pub configuration: String,
}
