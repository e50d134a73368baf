// src/store/structure.rs
// Learned task structure: the (name, duration) sequence captured from the
// most recent successful run of a flow name.

use super::Store;
use anyhow::Result;
use sqlx::Row;

impl Store {
    pub async fn save_learned_structure(
        &self,
        flow_name: &str,
        tasks: &[(String, i64)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM flow_task_structure WHERE flow_name = ?")
            .bind(flow_name)
            .execute(&mut *tx)
            .await?;
        for (seq, (name, estimated_ms)) in tasks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO flow_task_structure (flow_name, seq, task_name, estimated_ms)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(flow_name)
            .bind(seq as i64)
            .bind(name)
            .bind(estimated_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_learned_structure(&self, flow_name: &str) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT task_name, estimated_ms FROM flow_task_structure
             WHERE flow_name = ? ORDER BY seq ASC",
        )
        .bind(flow_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("task_name"), r.get("estimated_ms")))
            .collect())
    }
}
