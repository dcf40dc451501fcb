use super::{parse_dt, StateStore};
use crate::models::{AgentCheckpoint, AgentTaskHistoryEntry, CheckpointContext, CheckpointType};
use crate::Result;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> AgentCheckpoint {
    AgentCheckpoint {
        id: row.get("id"),
        project_id: row.get("project_id"),
        agent_id: row.get("agent_id"),
        task_id: row.get("task_id"),
        checkpoint_type: match row.get::<String, _>("checkpoint_type").as_str() {
            "auto" => CheckpointType::Auto,
            "context_exhaustion" => CheckpointType::ContextExhaustion,
            _ => CheckpointType::Manual,
        },
        stage: row.get("stage"),
        context: serde_json::from_str(&row.get::<String, _>("context")).unwrap_or_default(),
        expires_at: row.get::<Option<String>, _>("expires_at").map(|s| parse_dt(&s)),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
    }
}

impl StateStore {
    pub async fn create_checkpoint(
        &self,
        project_id: &str,
        agent_id: &str,
        task_id: Option<&str>,
        checkpoint_type: CheckpointType,
        stage: &str,
        context: CheckpointContext,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<AgentCheckpoint> {
        let checkpoint = AgentCheckpoint {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
            task_id: task_id.map(|s| s.to_string()),
            checkpoint_type,
            stage: stage.to_string(),
            context,
            expires_at,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO agent_checkpoints (id, project_id, agent_id, task_id, checkpoint_type,
                stage, context, expires_at, created_at)
             VALUES (?,?,?,?,?,?,?,?,?)",
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.project_id)
        .bind(&checkpoint.agent_id)
        .bind(&checkpoint.task_id)
        .bind(match checkpoint.checkpoint_type {
            CheckpointType::Manual => "manual",
            CheckpointType::Auto => "auto",
            CheckpointType::ContextExhaustion => "context_exhaustion",
        })
        .bind(&checkpoint.stage)
        .bind(serde_json::to_string(&checkpoint.context).unwrap_or_else(|_| "{}".to_string()))
        .bind(checkpoint.expires_at.map(|d| d.to_rfc3339()))
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(checkpoint)
    }

    pub async fn latest_checkpoint(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Option<AgentCheckpoint>> {
        let row = sqlx::query(
            "SELECT * FROM agent_checkpoints WHERE project_id = ? AND agent_id = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(project_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_checkpoint(&r)))
    }

    pub async fn list_checkpoints(&self, project_id: &str, agent_id: &str) -> Result<Vec<AgentCheckpoint>> {
        let rows = sqlx::query(
            "SELECT * FROM agent_checkpoints WHERE project_id = ? AND agent_id = ?
             ORDER BY created_at ASC",
        )
        .bind(project_id)
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_checkpoint).collect())
    }

    /// Returns true the first time `agent_id` appears in this project's
    /// history — callers use this to decide whether to send a welcome
    /// bundle alongside the claimed task's context.
    pub async fn is_first_task_for_agent(&self, project_id: &str, agent_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM agent_task_history WHERE project_id = ? AND agent_id = ?",
        )
        .bind(project_id)
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") == 0)
    }

    pub async fn record_task_claim(&self, project_id: &str, agent_id: &str, task_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_task_history (id, project_id, agent_id, task_id, claimed_at)
             VALUES (?,?,?,?,?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id)
        .bind(agent_id)
        .bind(task_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_task_claims(&self, project_id: &str, agent_id: &str) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM agent_task_history WHERE project_id = ? AND agent_id = ?",
        )
        .bind(project_id)
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn task_history(&self, project_id: &str, agent_id: &str) -> Result<Vec<AgentTaskHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM agent_task_history WHERE project_id = ? AND agent_id = ?
             ORDER BY claimed_at ASC",
        )
        .bind(project_id)
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| AgentTaskHistoryEntry {
                id: row.get("id"),
                project_id: row.get("project_id"),
                agent_id: row.get("agent_id"),
                task_id: row.get("task_id"),
                claimed_at: parse_dt(&row.get::<String, _>("claimed_at")),
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
    async fn first_task_detection_flips_after_one_claim() {
        let (store, project_id) = seeded().await;
        assert!(store.is_first_task_for_agent(&project_id, "a").await.unwrap());
        store.record_task_claim(&project_id, "a", "t1").await.unwrap();
        assert!(!store.is_first_task_for_agent(&project_id, "a").await.unwrap());
        assert_eq!(store.count_task_claims(&project_id, "a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn checkpoint_round_trips_context() {
        let (store, project_id) = seeded().await;
        let context = CheckpointContext {
            files_modified: vec!["a.rs".into()],
            completed_steps: vec!["step 1".into()],
            next_steps: vec!["step 2".into()],
            blockers: vec![],
            token_count: 1200,
        };
        store
            .create_checkpoint(&project_id, "a", Some("t1"), CheckpointType::Auto, "mid-task", context, None)
            .await
            .unwrap();
        let latest = store.latest_checkpoint(&project_id, "a").await.unwrap().unwrap();
        assert_eq!(latest.context.token_count, 1200);
        assert_eq!(latest.stage, "mid-task");
    }
}
