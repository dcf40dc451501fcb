use super::{parse_dt, StateStore};
use crate::Result;
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::Row;

#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub locked: bool,
    pub holder: Option<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl StateStore {
    async fn gc_expired(&self, project_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_locks WHERE project_id = ? AND expires_at < ?")
            .bind(project_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Attempts to acquire a lock on `file_path`. Expired locks are
    /// lazily garbage-collected first; this is never a blocking wait —
    /// callers poll with backoff on failure.
    pub async fn acquire_lock(
        &self,
        project_id: &str,
        file_path: &str,
        agent_id: &str,
        ttl_seconds: i64,
    ) -> Result<bool> {
        self.gc_expired(project_id).await?;
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds);
        let result = sqlx::query(
            "INSERT INTO file_locks (project_id, file_path, holder, locked_at, expires_at)
             VALUES (?,?,?,?,?)
             ON CONFLICT(project_id, file_path) DO NOTHING",
        )
        .bind(project_id)
        .bind(file_path)
        .bind(agent_id)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// No-op unless `agent_id` is the current holder (invariant 4).
    pub async fn release_lock(&self, project_id: &str, file_path: &str, agent_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM file_locks WHERE project_id = ? AND file_path = ? AND holder = ?",
        )
        .bind(project_id)
        .bind(file_path)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn check_lock(&self, project_id: &str, file_path: &str) -> Result<LockStatus> {
        self.gc_expired(project_id).await?;
        let row = sqlx::query(
            "SELECT holder, expires_at FROM file_locks WHERE project_id = ? AND file_path = ?",
        )
        .bind(project_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => LockStatus {
                locked: true,
                holder: Some(row.get("holder")),
                expires_at: Some(parse_dt(&row.get::<String, _>("expires_at"))),
            },
            None => LockStatus {
                locked: false,
                holder: None,
                expires_at: None,
            },
        })
    }

    /// Batch form of [`Self::check_lock`] for the `check_locks` tool,
    /// which takes an array of file paths (spec §6). Each path is GC'd
    /// and looked up independently; the returned vector is in the same
    /// order as `file_paths`.
    pub async fn check_locks(&self, project_id: &str, file_paths: &[String]) -> Result<Vec<LockStatus>> {
        let mut statuses = Vec::with_capacity(file_paths.len());
        for file_path in file_paths {
            statuses.push(self.check_lock(project_id, file_path).await?);
        }
        Ok(statuses)
    }

    pub async fn cleanup_stale_locks(&self, project_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_locks WHERE project_id = ? AND expires_at < ?")
            .bind(project_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_active_locks(&self, project_id: &str) -> Result<Vec<crate::models::FileLock>> {
        self.gc_expired(project_id).await?;
        let rows = sqlx::query("SELECT * FROM file_locks WHERE project_id = ?")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| crate::models::FileLock {
                project_id: row.get("project_id"),
                file_path: row.get("file_path"),
                holder: row.get("holder"),
                locked_at: parse_dt(&row.get::<String, _>("locked_at")),
                expires_at: parse_dt(&row.get::<String, _>("expires_at")),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Project;

    async fn seeded() -> (StateStore, String) {
        let store = StateStore::connect_in_memory().await.unwrap();
        let project = Project::new("org".into(), "p".into(), "p".into());
        store.create_project(&project).await.unwrap();
        (store, project.id)
    }

    #[tokio::test]
    async fn expired_lock_is_lazily_reclaimed() {
        let (store, project_id) = seeded().await;
        assert!(store.acquire_lock(&project_id, "x.ts", "a", -1).await.unwrap());
        assert!(store.acquire_lock(&project_id, "x.ts", "b", 60).await.unwrap());
        let status = store.check_lock(&project_id, "x.ts").await.unwrap();
        assert_eq!(status.holder.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn release_by_non_holder_is_noop() {
        let (store, project_id) = seeded().await;
        store.acquire_lock(&project_id, "x.ts", "a", 60).await.unwrap();
        let released = store.release_lock(&project_id, "x.ts", "b").await.unwrap();
        assert!(!released);
        assert!(store.check_lock(&project_id, "x.ts").await.unwrap().locked);
    }

    #[tokio::test]
    async fn acquire_then_release_restores_unlocked() {
        let (store, project_id) = seeded().await;
        store.acquire_lock(&project_id, "x.ts", "a", 60).await.unwrap();
        assert!(store.release_lock(&project_id, "x.ts", "a").await.unwrap());
        assert!(!store.check_lock(&project_id, "x.ts").await.unwrap().locked);
    }
}
