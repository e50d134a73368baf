// src/store/migrations.rs
// Embedded schema. Evolution is additive: base tables are CREATE IF NOT
// EXISTS, later columns are added with idempotent ALTERs.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

const BASE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS flows (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        flow_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        name TEXT NOT NULL,
        estimated_ms INTEGER NOT NULL,
        weight REAL NOT NULL,
        crucial_pass INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS flow_runs (
        id TEXT PRIMARY KEY,
        flow_id TEXT NOT NULL,
        flow_name TEXT NOT NULL,
        state TEXT NOT NULL,
        start_time INTEGER NOT NULL,
        end_time INTEGER,
        configuration TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '{}',
        progress REAL NOT NULL DEFAULT 0,
        client_color TEXT,
        client_name TEXT,
        report_path TEXT
    )",
    "CREATE TABLE IF NOT EXISTS task_runs (
        id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        name TEXT NOT NULL,
        state TEXT NOT NULL,
        start_time INTEGER,
        end_time INTEGER,
        duration_ms INTEGER,
        weight REAL NOT NULL DEFAULT 0,
        estimated_ms INTEGER NOT NULL,
        progress REAL NOT NULL DEFAULT 0,
        result TEXT,
        performance_warning TEXT,
        crucial_pass INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        message TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS task_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        task_seq INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        message TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS task_statistics (
        flow_name TEXT NOT NULL,
        task_name TEXT NOT NULL,
        avg_ms REAL NOT NULL,
        sample_count INTEGER NOT NULL,
        last_updated INTEGER NOT NULL,
        PRIMARY KEY (flow_name, task_name)
    )",
    "CREATE TABLE IF NOT EXISTS flow_statistics (
        flow_name TEXT PRIMARY KEY,
        avg_ms REAL NOT NULL,
        sample_count INTEGER NOT NULL,
        last_updated INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS flow_task_structure (
        flow_name TEXT NOT NULL,
        seq INTEGER NOT NULL,
        task_name TEXT NOT NULL,
        estimated_ms INTEGER NOT NULL,
        PRIMARY KEY (flow_name, seq)
    )",
    "CREATE INDEX IF NOT EXISTS idx_task_runs_run ON task_runs (run_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_logs_run ON logs (run_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_logs_run ON task_logs (run_id, task_seq)",
    "CREATE INDEX IF NOT EXISTS idx_flow_runs_name ON flow_runs (flow_name, start_time)",
];

/// Columns added after the base schema shipped.
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("task_statistics", "m2", "REAL NOT NULL DEFAULT 0"),
    ("flow_statistics", "m2", "REAL NOT NULL DEFAULT 0"),
];

pub async fn run(pool: &SqlitePool) -> Result<()> {
    for stmt in BASE_SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    for (table, column, decl) in ADDITIVE_COLUMNS {
        add_column_if_missing(pool, table, column, decl).await?;
    }
    Ok(())
}

/// ALTER TABLE ADD COLUMN, tolerating a re-run against a table that already
/// has the column.
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<()> {
    let stmt = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl);
    match sqlx::query(&stmt).execute(pool).await {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("duplicate column name") => {
            debug!("Column {}.{} already present", table, column);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
