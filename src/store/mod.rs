//! Durable, transactional repository of projects, tasks, agents, file
//! locks, cost events, access requests and checkpoints.
//!
//! Every multi-row mutation (claim, reassign, lock-acquire-with-GC,
//! cost-record-with-budget-update) runs inside a single
//! [`sqlx::Transaction`] so consumers only ever observe whole-transaction
//! snapshots between calls.

mod access;
mod beads;
mod checkpoints;
mod conflicts;
mod cost;
mod locks;
mod onboarding;
mod projects_agents;
mod tasks;
mod zones;

pub use beads::BeadImportResult;
pub use conflicts::ConflictDetector;
pub use cost::BudgetStatus;
pub use locks::LockStatus;
pub use tasks::{TaskFilters, TaskUpdate};
pub use zones::ZoneManager;

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Opens (creating if necessary) the WAL-mode SQLite database at
    /// `path` and runs pending migrations.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn json_list(value: &[String]) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn parse_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn json_map(
    value: &std::collections::HashMap<String, serde_json::Value>,
) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

pub(crate) fn parse_json_map(
    raw: &str,
) -> std::collections::HashMap<String, serde_json::Value> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn parse_dt(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}
