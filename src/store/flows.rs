// src/store/flows.rs
// Flow definition persistence.

use super::{from_millis, to_millis, Store};
use crate::model::{FlowDefinition, TaskDefinition};
use anyhow::Result;
use sqlx::Row;
use std::collections::BTreeMap;

impl Store {
    /// Upsert a flow definition and replace its task children atomically.
    pub async fn save_flow(&self, def: &FlowDefinition) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR REPLACE INTO flows (id, name, description, tags, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&def.id)
        .bind(&def.name)
        .bind(&def.description)
        .bind(serde_json::to_string(&def.tags)?)
        .bind(to_millis(def.created_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM tasks WHERE flow_id = ?")
            .bind(&def.id)
            .execute(&mut *tx)
            .await?;

        for (seq, task) in def.tasks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO tasks (id, flow_id, seq, name, estimated_ms, weight, crucial_pass)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&task.id)
            .bind(&def.id)
            .bind(seq as i64)
            .bind(&task.name)
            .bind(task.estimated_ms)
            .bind(task.weight)
            .bind(task.crucial_pass)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load every registered flow with its task list. Used once at startup.
    pub async fn load_all_flows(&self) -> Result<Vec<FlowDefinition>> {
        let rows = sqlx::query(
            "SELECT id, name, description, tags, created_at FROM flows ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let tags: BTreeMap<String, String> =
                serde_json::from_str(row.get::<String, _>("tags").as_str()).unwrap_or_default();

            let task_rows = sqlx::query(
                "SELECT id, name, estimated_ms, weight, crucial_pass
                 FROM tasks WHERE flow_id = ? ORDER BY seq ASC",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;

            let tasks = task_rows
                .iter()
                .map(|r| TaskDefinition {
                    id: r.get("id"),
                    name: r.get("name"),
                    estimated_ms: r.get("estimated_ms"),
                    weight: r.get("weight"),
                    crucial_pass: r.get("crucial_pass"),
                })
                .collect();

            flows.push(FlowDefinition {
                id,
                name: row.get("name"),
                description: row.get("description"),
                tags,
                tasks,
                created_at: from_millis(row.get("created_at")),
            });
        }

        Ok(flows)
    }

    pub async fn delete_flow(&self, flow_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tasks WHERE flow_id = ?")
            .bind(flow_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(flow_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
