use super::{json_map, json_list, parse_dt, parse_json_list, parse_json_map, StateStore};
use crate::models::{Agent, AgentStatus, Budget, ConflictStrategy, Project};
use crate::{CoreError, Result};
use chrono::Utc;
use sqlx::Row;

pub(super) fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Agent {
    Agent {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        provider: row.get("provider"),
        model: row.get("model"),
        status: row
            .get::<String, _>("status")
            .parse()
            .unwrap_or(AgentStatus::Idle),
        capabilities: parse_json_list(&row.get::<String, _>("capabilities")),
        input_cost_per_million: row.get("input_cost_per_million"),
        output_cost_per_million: row.get("output_cost_per_million"),
        quota: row.get("quota"),
        last_heartbeat: row
            .get::<Option<String>, _>("last_heartbeat")
            .map(|s| parse_dt(&s)),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        updated_at: parse_dt(&row.get::<String, _>("updated_at")),
    }
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> Project {
    let budget_total: Option<f64> = row.get("budget_total");
    let budget = budget_total.map(|total| Budget {
        total,
        spent: row.get("budget_spent"),
        currency: row
            .get::<Option<String>, _>("budget_currency")
            .unwrap_or_else(|| "USD".to_string()),
        alert_threshold: row.get::<Option<f64>, _>("budget_alert_threshold").unwrap_or(0.8),
    });
    Project {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        root_path: row.get("root_path"),
        git_remote: row.get("git_remote"),
        git_branch: row.get("git_branch"),
        conflict_strategy: row
            .get::<String, _>("conflict_strategy")
            .parse()
            .unwrap_or(ConflictStrategy::Lock),
        budget,
        settings: parse_json_map(&row.get::<String, _>("settings")),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        updated_at: parse_dt(&row.get::<String, _>("updated_at")),
    }
}

impl StateStore {
    pub async fn create_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects (id, organization_id, name, slug, root_path, git_remote,
                git_branch, conflict_strategy, budget_total, budget_spent, budget_currency,
                budget_alert_threshold, settings, created_at, updated_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&project.id)
        .bind(&project.organization_id)
        .bind(&project.name)
        .bind(&project.slug)
        .bind(&project.root_path)
        .bind(&project.git_remote)
        .bind(&project.git_branch)
        .bind(project.conflict_strategy.as_str())
        .bind(project.budget.as_ref().map(|b| b.total))
        .bind(project.budget.as_ref().map(|b| b.spent).unwrap_or(0.0))
        .bind(project.budget.as_ref().map(|b| b.currency.clone()))
        .bind(project.budget.as_ref().map(|b| b.alert_threshold))
        .bind(json_map(&project.settings))
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("project {project_id}")))?;
        Ok(row_to_project(&row))
    }

    pub async fn list_projects(&self, organization_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects WHERE organization_id = ? ORDER BY created_at ASC")
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_project).collect())
    }

    /// Upsert keyed on (project_id, id): first registration inserts,
    /// later calls with the same id only refresh identity fields and
    /// leave status/heartbeat untouched.
    pub async fn register_agent(&self, agent: &Agent) -> Result<Agent> {
        if let Some(existing) = self.get_agent(&agent.project_id, &agent.id).await? {
            let _ = existing;
            sqlx::query(
                "UPDATE agents SET name=?, provider=?, model=?, capabilities=?, updated_at=?
                 WHERE project_id=? AND id=?",
            )
            .bind(&agent.name)
            .bind(&agent.provider)
            .bind(&agent.model)
            .bind(json_list(&agent.capabilities))
            .bind(Utc::now().to_rfc3339())
            .bind(&agent.project_id)
            .bind(&agent.id)
            .execute(&self.pool)
            .await?;
            return self
                .get_agent(&agent.project_id, &agent.id)
                .await?
                .ok_or_else(|| CoreError::Internal(anyhow::anyhow!("agent vanished after upsert")));
        }

        sqlx::query(
            "INSERT INTO agents (id, project_id, name, provider, model, status, capabilities,
                input_cost_per_million, output_cost_per_million, quota, last_heartbeat,
                created_at, updated_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&agent.id)
        .bind(&agent.project_id)
        .bind(&agent.name)
        .bind(&agent.provider)
        .bind(&agent.model)
        .bind(agent.status.as_str())
        .bind(json_list(&agent.capabilities))
        .bind(agent.input_cost_per_million)
        .bind(agent.output_cost_per_million)
        .bind(agent.quota)
        .bind(agent.last_heartbeat.map(|d| d.to_rfc3339()))
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(agent.clone())
    }

    pub async fn update_agent_status(
        &self,
        project_id: &str,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE agents SET status=?, updated_at=? WHERE project_id=? AND id=?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(project_id)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("agent {agent_id}")));
        }
        Ok(())
    }

    pub async fn touch_heartbeat(&self, project_id: &str, agent_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE agents SET last_heartbeat=?, updated_at=? WHERE project_id=? AND id=?")
            .bind(Utc::now().to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .bind(project_id)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("agent {agent_id}")));
        }
        Ok(())
    }

    pub async fn list_agents(&self, project_id: &str) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE project_id = ? ORDER BY created_at ASC")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_agent).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (StateStore, String) {
        let store = StateStore::connect_in_memory().await.unwrap();
        let project = Project::new("org".into(), "p".into(), "p".into());
        store.create_project(&project).await.unwrap();
        (store, project.id)
    }

    #[tokio::test]
    async fn register_agent_is_idempotent_upsert() {
        let (store, project_id) = seeded().await;
        let mut agent = Agent::new(
            project_id.clone(),
            "a1".into(),
            "First".into(),
            "anthropic".into(),
            "claude-code".into(),
        );
        store.register_agent(&agent).await.unwrap();
        agent.name = "Renamed".into();
        let updated = store.register_agent(&agent).await.unwrap();
        assert_eq!(updated.name, "Renamed");
        let all = store.list_agents(&project_id).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn update_status_and_heartbeat() {
        let (store, project_id) = seeded().await;
        let agent = Agent::new(
            project_id.clone(),
            "a1".into(),
            "First".into(),
            "anthropic".into(),
            "claude-code".into(),
        );
        store.register_agent(&agent).await.unwrap();
        store
            .update_agent_status(&project_id, "a1", AgentStatus::Working)
            .await
            .unwrap();
        store.touch_heartbeat(&project_id, "a1").await.unwrap();
        let fetched = store.get_agent(&project_id, "a1").await.unwrap().unwrap();
        assert_eq!(fetched.status, AgentStatus::Working);
        assert!(fetched.last_heartbeat.is_some());
    }
}
