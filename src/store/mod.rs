// src/store/mod.rs
// Durable SQLite persistence for flows, runs, statistics, and learned
// structures. All engine writes funnel through the engine's exclusive guard;
// the pool itself runs WAL with concurrent readers.

mod flows;
mod migrations;
mod runs;
mod statistics;
mod structure;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database and apply migrations.
    /// Failure here is fatal to startup.
    pub async fn open(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrations::run(&pool).await?;
        info!("Database ready: {}", database_url);

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        migrations::run(&pool).await?;
        Ok(Self { pool })
    }
}

pub(crate) fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

pub(crate) fn opt_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(to_millis)
}
