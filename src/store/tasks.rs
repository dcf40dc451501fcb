use super::{json_list, json_map, parse_dt, parse_json_list, parse_json_map, StateStore};
use crate::models::{Priority, Task, TaskStatus};
use crate::{CoreError, Result};
use chrono::Utc;
use sqlx::Row;

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Task {
    Task {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row
            .get::<String, _>("status")
            .parse()
            .unwrap_or(TaskStatus::Pending),
        priority: row
            .get::<String, _>("priority")
            .parse()
            .unwrap_or(Priority::Medium),
        assignee: row.get("assignee"),
        claimed_at: row.get::<Option<String>, _>("claimed_at").map(|s| parse_dt(&s)),
        started_at: row.get::<Option<String>, _>("started_at").map(|s| parse_dt(&s)),
        completed_at: row
            .get::<Option<String>, _>("completed_at")
            .map(|s| parse_dt(&s)),
        dependencies: parse_json_list(&row.get::<String, _>("dependencies")),
        blocked_by: parse_json_list(&row.get::<String, _>("blocked_by")),
        files: parse_json_list(&row.get::<String, _>("files")),
        tags: parse_json_list(&row.get::<String, _>("tags")),
        estimated_tokens: row
            .get::<Option<i64>, _>("estimated_tokens")
            .map(|v| v as u64),
        actual_tokens: row.get::<Option<i64>, _>("actual_tokens").map(|v| v as u64),
        metadata: parse_json_map(&row.get::<String, _>("metadata")),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        updated_at: parse_dt(&row.get::<String, _>("updated_at")),
    }
}

/// Non-destructive partial update accepted by `update_task`.
#[derive(Debug, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub notes: Option<String>,
    pub actual_tokens: Option<u64>,
    pub blocked_by: Option<Vec<String>>,
}

/// Filters accepted by `list_tasks`.
#[derive(Debug, Default)]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
}

impl StateStore {
    pub async fn create_task(&self, task: &Task) -> Result<()> {
        if task.dependencies.iter().any(|d| d == &task.id) {
            return Err(CoreError::Validation(
                "task cannot depend on itself".to_string(),
            ));
        }
        sqlx::query(
            "INSERT INTO tasks (id, project_id, title, description, status, priority, assignee,
                claimed_at, started_at, completed_at, dependencies, blocked_by, files, tags,
                estimated_tokens, actual_tokens, metadata, created_at, updated_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&task.id)
        .bind(&task.project_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(&task.assignee)
        .bind(task.claimed_at.map(|d| d.to_rfc3339()))
        .bind(task.started_at.map(|d| d.to_rfc3339()))
        .bind(task.completed_at.map(|d| d.to_rfc3339()))
        .bind(json_list(&task.dependencies))
        .bind(json_list(&task.blocked_by))
        .bind(json_list(&task.files))
        .bind(json_list(&task.tags))
        .bind(task.estimated_tokens.map(|v| v as i64))
        .bind(task.actual_tokens.map(|v| v as i64))
        .bind(json_map(&task.metadata))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_task(&self, project_id: &str, task_id: &str) -> Result<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))?;
        Ok(row_to_task(&row))
    }

    pub async fn list_tasks(&self, project_id: &str, filters: &TaskFilters) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE project_id = ?")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        let mut tasks: Vec<Task> = rows.iter().map(row_to_task).collect();

        tasks.retain(|t| {
            filters.status.map(|s| s == t.status).unwrap_or(true)
                && filters.priority.map(|p| p == t.priority).unwrap_or(true)
                && filters
                    .assignee
                    .as_ref()
                    .map(|a| t.assignee.as_deref() == Some(a.as_str()))
                    .unwrap_or(true)
        });

        tasks.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(tasks)
    }

    /// Attempts to claim `task_id` for `agent_id`. This is the hot
    /// concurrency path: a single conditional `UPDATE` whose row count
    /// decides the winner, so concurrent claimants never both succeed.
    pub async fn claim_task(&self, project_id: &str, task_id: &str, agent_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'claimed', assignee = ?, claimed_at = ?, updated_at = ?
             WHERE project_id = ? AND id = ? AND status = 'pending'
               AND (assignee IS NULL OR assignee = ?)",
        )
        .bind(agent_id)
        .bind(&now)
        .bind(&now)
        .bind(project_id)
        .bind(task_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn update_task(
        &self,
        project_id: &str,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM tasks WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))?;
        let mut task = row_to_task(&row);

        if let Some(notes) = update.notes {
            let mut existing = task
                .metadata
                .get("notes")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            existing.push(serde_json::Value::String(notes));
            task.metadata
                .insert("notes".to_string(), serde_json::Value::Array(existing));
        }
        if let Some(tokens) = update.actual_tokens {
            task.actual_tokens = Some(tokens);
        }
        if let Some(blocked_by) = update.blocked_by {
            task.blocked_by = blocked_by;
        }
        if let Some(status) = update.status {
            if status.requires_assignee() && task.assignee.is_none() {
                return Err(CoreError::Validation(format!(
                    "cannot set task {task_id} to {status:?} without an assignee"
                )));
            }
            if status == TaskStatus::InProgress && task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
            if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
                task.completed_at = Some(Utc::now());
            }
            task.status = status;
        }
        task.updated_at = Utc::now();

        sqlx::query(
            "UPDATE tasks SET status=?, assignee=?, claimed_at=?, started_at=?, completed_at=?,
                blocked_by=?, actual_tokens=?, metadata=?, updated_at=? WHERE project_id=? AND id=?",
        )
        .bind(task.status.as_str())
        .bind(&task.assignee)
        .bind(task.claimed_at.map(|d| d.to_rfc3339()))
        .bind(task.started_at.map(|d| d.to_rfc3339()))
        .bind(task.completed_at.map(|d| d.to_rfc3339()))
        .bind(json_list(&task.blocked_by))
        .bind(task.actual_tokens.map(|v| v as i64))
        .bind(json_map(&task.metadata))
        .bind(task.updated_at.to_rfc3339())
        .bind(project_id)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    /// Atomically reassigns `task_id` to `new_agent`, bumps the
    /// reassignment counter, and drops every file lock the previous
    /// assignee held in this project.
    pub async fn reassign_task(
        &self,
        project_id: &str,
        task_id: &str,
        new_agent: &str,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM tasks WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))?;
        let mut task = row_to_task(&row);
        let previous_agent = task.assignee.clone();

        task.assignee = Some(new_agent.to_string());
        task.status = TaskStatus::Claimed;
        task.claimed_at = Some(Utc::now());
        let count = task.reassignment_count() + 1;
        task.metadata
            .insert("reassignmentCount".to_string(), serde_json::json!(count));
        if let Some(prev) = &previous_agent {
            task.metadata.insert(
                "lastReassignedFrom".to_string(),
                serde_json::json!(prev),
            );
        }
        task.updated_at = Utc::now();

        sqlx::query(
            "UPDATE tasks SET assignee=?, status=?, claimed_at=?, metadata=?, updated_at=?
             WHERE project_id=? AND id=?",
        )
        .bind(&task.assignee)
        .bind(task.status.as_str())
        .bind(task.claimed_at.map(|d| d.to_rfc3339()))
        .bind(json_map(&task.metadata))
        .bind(task.updated_at.to_rfc3339())
        .bind(project_id)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        if let Some(prev) = previous_agent {
            sqlx::query("DELETE FROM file_locks WHERE project_id = ? AND holder = ?")
                .bind(project_id)
                .bind(&prev)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(task)
    }

    pub async fn cancel_task(&self, project_id: &str, task_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status='cancelled', updated_at=? WHERE project_id=? AND id=?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(project_id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn unblock_task(&self, project_id: &str, task_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status='pending', assignee=NULL, updated_at=?
             WHERE project_id=? AND id=? AND status='blocked'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(project_id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;

    async fn seeded_store() -> (StateStore, String) {
        let store = StateStore::connect_in_memory().await.unwrap();
        let project = crate::models::Project::new(
            "org-1".to_string(),
            "Test".to_string(),
            "test".to_string(),
        );
        store.create_project(&project).await.unwrap();
        (store, project.id)
    }

    #[tokio::test]
    async fn claim_race_has_exactly_one_winner() {
        let (store, project_id) = seeded_store().await;
        let task = Task::new(
            project_id.clone(),
            "Do thing".to_string(),
            "".to_string(),
            Priority::Medium,
        );
        store.create_task(&task).await.unwrap();

        let a = store.claim_task(&project_id, &task.id, "agent-a").await.unwrap();
        let b = store.claim_task(&project_id, &task.id, "agent-b").await.unwrap();

        assert!(a);
        assert!(!b);
        let stored = store.get_task(&project_id, &task.id).await.unwrap();
        assert_eq!(stored.assignee.as_deref(), Some("agent-a"));
        assert_eq!(stored.status, TaskStatus::Claimed);
    }

    #[tokio::test]
    async fn list_orders_by_priority_then_created_at() {
        let (store, project_id) = seeded_store().await;
        let low = Task::new(project_id.clone(), "low".into(), "".into(), Priority::Low);
        let critical = Task::new(
            project_id.clone(),
            "critical".into(),
            "".into(),
            Priority::Critical,
        );
        store.create_task(&low).await.unwrap();
        store.create_task(&critical).await.unwrap();

        let listed = store.list_tasks(&project_id, &TaskFilters::default()).await.unwrap();
        assert_eq!(listed[0].id, critical.id);
        assert_eq!(listed[1].id, low.id);
    }

    #[tokio::test]
    async fn reassign_bumps_counter_and_drops_old_locks() {
        let (store, project_id) = seeded_store().await;
        let task = Task::new(project_id.clone(), "t".into(), "".into(), Priority::Medium);
        store.create_task(&task).await.unwrap();
        store.claim_task(&project_id, &task.id, "agent-a").await.unwrap();
        store
            .acquire_lock(&project_id, "a.ts", "agent-a", 300)
            .await
            .unwrap();
        store
            .acquire_lock(&project_id, "b.ts", "agent-a", 300)
            .await
            .unwrap();

        let reassigned = store
            .reassign_task(&project_id, &task.id, "agent-b")
            .await
            .unwrap();
        assert_eq!(reassigned.assignee.as_deref(), Some("agent-b"));
        assert_eq!(reassigned.status, TaskStatus::Claimed);
        assert_eq!(reassigned.reassignment_count(), 1);

        let a_check = store.check_lock(&project_id, "a.ts").await.unwrap();
        let b_check = store.check_lock(&project_id, "b.ts").await.unwrap();
        assert!(!a_check.locked);
        assert!(!b_check.locked);
    }

    #[tokio::test]
    async fn update_rejects_non_pending_status_without_assignee() {
        let (store, project_id) = seeded_store().await;
        let task = Task::new(project_id.clone(), "t".into(), "".into(), Priority::Medium);
        store.create_task(&task).await.unwrap();

        let result = store
            .update_task(
                &project_id,
                &task.id,
                TaskUpdate { status: Some(TaskStatus::InProgress), ..Default::default() },
            )
            .await;
        assert!(result.is_err());

        let unchanged = store.get_task(&project_id, &task.id).await.unwrap();
        assert_eq!(unchanged.status, TaskStatus::Pending);
    }
}
