// src/store/runs.rs
// Run persistence. save_run replaces all children in one transaction; the
// delete-then-insert keeps the task_runs row set authoritative.

use super::{from_millis, opt_millis, to_millis, Store};
use crate::model::{FlowRun, LogEntry, RunState, TaskRun};
use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeMap;

impl Store {
    pub async fn save_run(&self, run: &FlowRun) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR REPLACE INTO flow_runs
             (id, flow_id, flow_name, state, start_time, end_time, configuration,
              tags, progress, client_color, client_name, report_path)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.flow_id)
        .bind(&run.flow_name)
        .bind(run.state.as_str())
        .bind(to_millis(run.start_time))
        .bind(opt_millis(run.end_time))
        .bind(&run.configuration)
        .bind(serde_json::to_string(&run.tags)?)
        .bind(run.progress)
        .bind(&run.client_color)
        .bind(&run.client_name)
        .bind(&run.report_path)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM task_runs WHERE run_id = ?")
            .bind(&run.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM logs WHERE run_id = ?")
            .bind(&run.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM task_logs WHERE run_id = ?")
            .bind(&run.id)
            .execute(&mut *tx)
            .await?;

        for (seq, task) in run.tasks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO task_runs
                 (id, run_id, seq, name, state, start_time, end_time, duration_ms,
                  weight, estimated_ms, progress, result, performance_warning, crucial_pass)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&task.id)
            .bind(&run.id)
            .bind(seq as i64)
            .bind(&task.name)
            .bind(task.state.as_str())
            .bind(opt_millis(task.start_time))
            .bind(opt_millis(task.end_time))
            .bind(task.duration_ms)
            .bind(task.weight)
            .bind(task.estimated_ms)
            .bind(task.progress)
            .bind(
                task.result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(
                task.performance_warning
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(task.crucial_pass)
            .execute(&mut *tx)
            .await?;

            for log in &task.logs {
                sqlx::query(
                    "INSERT INTO task_logs (run_id, task_seq, timestamp, message)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&run.id)
                .bind(seq as i64)
                .bind(to_millis(log.timestamp))
                .bind(&log.message)
                .execute(&mut *tx)
                .await?;
            }
        }

        for log in &run.logs {
            sqlx::query("INSERT INTO logs (run_id, timestamp, message) VALUES (?, ?, ?)")
                .bind(&run.id)
                .bind(to_millis(log.timestamp))
                .bind(&log.message)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load every run with children, newest start first. Used once at startup.
    pub async fn load_all_runs(&self) -> Result<Vec<FlowRun>> {
        let rows = sqlx::query(
            "SELECT id, flow_id, flow_name, state, start_time, end_time, configuration,
                    tags, progress, client_color, client_name, report_path
             FROM flow_runs ORDER BY start_time DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            runs.push(self.hydrate_run(row).await?);
        }
        Ok(runs)
    }

    async fn hydrate_run(&self, row: SqliteRow) -> Result<FlowRun> {
        let run_id: String = row.get("id");
        let tags: BTreeMap<String, String> =
            serde_json::from_str(row.get::<String, _>("tags").as_str()).unwrap_or_default();

        let task_rows = sqlx::query(
            "SELECT seq, id, name, state, start_time, end_time, duration_ms,
                    weight, estimated_ms, progress, result, performance_warning, crucial_pass
             FROM task_runs WHERE run_id = ? ORDER BY seq ASC",
        )
        .bind(&run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(task_rows.len());
        for r in &task_rows {
            let seq: i64 = r.get("seq");
            let log_rows = sqlx::query(
                "SELECT timestamp, message FROM task_logs
                 WHERE run_id = ? AND task_seq = ? ORDER BY id ASC",
            )
            .bind(&run_id)
            .bind(seq)
            .fetch_all(&self.pool)
            .await?;

            tasks.push(TaskRun {
                id: r.get("id"),
                name: r.get("name"),
                state: parse_state(r.get::<String, _>("state").as_str()),
                start_time: r.get::<Option<i64>, _>("start_time").map(from_millis),
                end_time: r.get::<Option<i64>, _>("end_time").map(from_millis),
                duration_ms: r.get("duration_ms"),
                weight: r.get("weight"),
                estimated_ms: r.get("estimated_ms"),
                progress: r.get("progress"),
                result: r
                    .get::<Option<String>, _>("result")
                    .and_then(|s| serde_json::from_str(&s).ok()),
                performance_warning: r
                    .get::<Option<String>, _>("performance_warning")
                    .and_then(|s| serde_json::from_str(&s).ok()),
                crucial_pass: r.get("crucial_pass"),
                logs: log_rows
                    .iter()
                    .map(|l| LogEntry {
                        timestamp: from_millis(l.get("timestamp")),
                        message: l.get("message"),
                    })
                    .collect(),
            });
        }

        let log_rows =
            sqlx::query("SELECT timestamp, message FROM logs WHERE run_id = ? ORDER BY id ASC")
                .bind(&run_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(FlowRun {
            id: run_id,
            flow_id: row.get("flow_id"),
            flow_name: row.get("flow_name"),
            state: parse_state(row.get::<String, _>("state").as_str()),
            start_time: from_millis(row.get("start_time")),
            end_time: row.get::<Option<i64>, _>("end_time").map(from_millis),
            configuration: row.get("configuration"),
            tags,
            tasks,
            progress: row.get("progress"),
            client_color: row.get("client_color"),
            client_name: row.get("client_name"),
            report_path: row.get("report_path"),
            logs: log_rows
                .iter()
                .map(|l| LogEntry {
                    timestamp: from_millis(l.get("timestamp")),
                    message: l.get("message"),
                })
                .collect(),
        })
    }

    pub async fn delete_run(&self, run_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for stmt in [
            "DELETE FROM task_logs WHERE run_id = ?",
            "DELETE FROM logs WHERE run_id = ?",
            "DELETE FROM task_runs WHERE run_id = ?",
            "DELETE FROM flow_runs WHERE id = ?",
        ] {
            sqlx::query(stmt).bind(run_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn parse_state(s: &str) -> RunState {
    RunState::parse(s).unwrap_or(RunState::Failed)
}
