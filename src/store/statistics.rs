// src/store/statistics.rs
// Welford accumulator rows and completed-sample history queries.

use super::{from_millis, Store};
use crate::model::{FlowStatsEntry, HistorySample, StatRecord, TaskStatsEntry};
use crate::stats;
use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use std::collections::HashMap;

impl Store {
    pub async fn get_task_stats(&self, flow_name: &str, task_name: &str) -> Result<Option<StatRecord>> {
        let row = sqlx::query(
            "SELECT avg_ms, sample_count, m2, last_updated
             FROM task_statistics WHERE flow_name = ? AND task_name = ?",
        )
        .bind(flow_name)
        .bind(task_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| StatRecord {
            avg_ms: r.get("avg_ms"),
            sample_count: r.get("sample_count"),
            m2: r.get("m2"),
            last_updated: from_millis(r.get("last_updated")),
        }))
    }

    /// All task statistics for one flow, keyed by task name. Used when a
    /// run's estimates are refreshed in bulk.
    pub async fn get_flow_task_stats(&self, flow_name: &str) -> Result<HashMap<String, StatRecord>> {
        let rows = sqlx::query(
            "SELECT task_name, avg_ms, sample_count, m2, last_updated
             FROM task_statistics WHERE flow_name = ?",
        )
        .bind(flow_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get("task_name"),
                    StatRecord {
                        avg_ms: r.get("avg_ms"),
                        sample_count: r.get("sample_count"),
                        m2: r.get("m2"),
                        last_updated: from_millis(r.get("last_updated")),
                    },
                )
            })
            .collect())
    }

    /// Fold a completed duration into the (flow, task) accumulator.
    pub async fn update_task_stats(
        &self,
        flow_name: &str,
        task_name: &str,
        duration_ms: i64,
    ) -> Result<()> {
        let existing = self.get_task_stats(flow_name, task_name).await?;
        let (avg, n, m2) = next_accumulator(existing, duration_ms);

        sqlx::query(
            "INSERT OR REPLACE INTO task_statistics
             (flow_name, task_name, avg_ms, sample_count, m2, last_updated)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(flow_name)
        .bind(task_name)
        .bind(avg)
        .bind(n)
        .bind(m2)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_flow_stats(&self, flow_name: &str) -> Result<Option<StatRecord>> {
        let row = sqlx::query(
            "SELECT avg_ms, sample_count, m2, last_updated
             FROM flow_statistics WHERE flow_name = ?",
        )
        .bind(flow_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| StatRecord {
            avg_ms: r.get("avg_ms"),
            sample_count: r.get("sample_count"),
            m2: r.get("m2"),
            last_updated: from_millis(r.get("last_updated")),
        }))
    }

    /// Fold a completed run duration into the flow accumulator.
    pub async fn update_flow_stats(&self, flow_name: &str, duration_ms: i64) -> Result<()> {
        let existing = self.get_flow_stats(flow_name).await?;
        let (avg, n, m2) = next_accumulator(existing, duration_ms);

        sqlx::query(
            "INSERT OR REPLACE INTO flow_statistics
             (flow_name, avg_ms, sample_count, m2, last_updated)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(flow_name)
        .bind(avg)
        .bind(n)
        .bind(m2)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all_task_stats(&self) -> Result<Vec<TaskStatsEntry>> {
        let rows = sqlx::query(
            "SELECT flow_name, task_name, avg_ms, sample_count, m2, last_updated
             FROM task_statistics ORDER BY flow_name, task_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let record = StatRecord {
                    avg_ms: r.get("avg_ms"),
                    sample_count: r.get("sample_count"),
                    m2: r.get("m2"),
                    last_updated: from_millis(r.get("last_updated")),
                };
                TaskStatsEntry {
                    flow_name: r.get("flow_name"),
                    task_name: r.get("task_name"),
                    stddev_ms: stats::stddev(record.sample_count, record.m2),
                    stats: record,
                }
            })
            .collect())
    }

    pub async fn all_flow_stats(&self) -> Result<Vec<FlowStatsEntry>> {
        let rows = sqlx::query(
            "SELECT flow_name, avg_ms, sample_count, m2, last_updated
             FROM flow_statistics ORDER BY flow_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let record = StatRecord {
                    avg_ms: r.get("avg_ms"),
                    sample_count: r.get("sample_count"),
                    m2: r.get("m2"),
                    last_updated: from_millis(r.get("last_updated")),
                };
                FlowStatsEntry {
                    flow_name: r.get("flow_name"),
                    stddev_ms: stats::stddev(record.sample_count, record.m2),
                    stats: record,
                }
            })
            .collect())
    }

    /// Recent completed task durations, oldest first. The query runs
    /// newest-first and is reversed.
    pub async fn task_history(
        &self,
        flow_name: &str,
        task_name: &str,
        limit: i64,
    ) -> Result<Vec<HistorySample>> {
        let rows = sqlx::query(
            "SELECT tr.duration_ms, tr.end_time
             FROM task_runs tr
             JOIN flow_runs fr ON fr.id = tr.run_id
             WHERE fr.flow_name = ? AND tr.name = ? AND tr.state = 'completed'
               AND tr.duration_ms IS NOT NULL AND tr.end_time IS NOT NULL
             ORDER BY tr.end_time DESC LIMIT ?",
        )
        .bind(flow_name)
        .bind(task_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut samples: Vec<HistorySample> = rows
            .into_iter()
            .map(|r| HistorySample {
                duration_ms: r.get("duration_ms"),
                ended_at: from_millis(r.get("end_time")),
            })
            .collect();
        samples.reverse();
        Ok(samples)
    }

    /// Recent completed run durations, oldest first.
    pub async fn flow_history(&self, flow_name: &str, limit: i64) -> Result<Vec<HistorySample>> {
        let rows = sqlx::query(
            "SELECT start_time, end_time FROM flow_runs
             WHERE flow_name = ? AND state = 'completed' AND end_time IS NOT NULL
             ORDER BY end_time DESC LIMIT ?",
        )
        .bind(flow_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut samples: Vec<HistorySample> = rows
            .into_iter()
            .map(|r| {
                let start: i64 = r.get("start_time");
                let end: i64 = r.get("end_time");
                HistorySample {
                    duration_ms: end - start,
                    ended_at: from_millis(end),
                }
            })
            .collect();
        samples.reverse();
        Ok(samples)
    }

    /// Drop statistics for one flow name. Called when its last run is deleted.
    pub async fn purge_flow_statistics(&self, flow_name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_statistics WHERE flow_name = ?")
            .bind(flow_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM flow_statistics WHERE flow_name = ?")
            .bind(flow_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn clear_statistics(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_statistics")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM flow_statistics")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// First-ever samples seed the accumulator at n=1 with m2=0; later samples
/// take a Welford step.
fn next_accumulator(existing: Option<StatRecord>, duration_ms: i64) -> (f64, i64, f64) {
    match existing {
        Some(s) => stats::welford_step(s.avg_ms, s.sample_count, s.m2, duration_ms as f64),
        None => (duration_ms as f64, 1, 0.0),
    }
}
