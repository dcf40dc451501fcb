use super::StateStore;
use crate::models::CostEvent;
use crate::{CoreError, Result};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

/// Project spend as a fraction of its declared budget. `None` when the
/// project carries no budget (unmetered).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BudgetStatus {
    pub spent: f64,
    pub total: Option<f64>,
    pub fraction_used: Option<f64>,
    pub alert_threshold: Option<f64>,
    pub over_alert_threshold: bool,
}

impl StateStore {
    /// Inserts a cost event and increments the owning project's spend in
    /// one transaction, so a reader never observes the event without the
    /// corresponding budget update.
    pub async fn record_cost(
        &self,
        project_id: &str,
        agent_id: &str,
        task_id: Option<&str>,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> Result<CostEvent> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(CoreError::not_found(format!("project {project_id}")));
        }

        let event = CostEvent {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
            task_id: task_id.map(|s| s.to_string()),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO cost_events (id, project_id, agent_id, task_id, model, input_tokens,
                output_tokens, cost_usd, created_at)
             VALUES (?,?,?,?,?,?,?,?,?)",
        )
        .bind(&event.id)
        .bind(&event.project_id)
        .bind(&event.agent_id)
        .bind(&event.task_id)
        .bind(&event.model)
        .bind(event.input_tokens as i64)
        .bind(event.output_tokens as i64)
        .bind(event.cost_usd)
        .bind(event.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE projects SET budget_spent = budget_spent + ?, updated_at = ? WHERE id = ?")
            .bind(cost_usd)
            .bind(Utc::now().to_rfc3339())
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(event)
    }

    pub async fn list_cost_events(&self, project_id: &str) -> Result<Vec<CostEvent>> {
        let rows = sqlx::query("SELECT * FROM cost_events WHERE project_id = ? ORDER BY created_at ASC")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| CostEvent {
                id: row.get("id"),
                project_id: row.get("project_id"),
                agent_id: row.get("agent_id"),
                task_id: row.get("task_id"),
                model: row.get("model"),
                input_tokens: row.get::<i64, _>("input_tokens") as u64,
                output_tokens: row.get::<i64, _>("output_tokens") as u64,
                cost_usd: row.get("cost_usd"),
                created_at: super::parse_dt(&row.get::<String, _>("created_at")),
            })
            .collect())
    }

    pub async fn budget_status(&self, project_id: &str) -> Result<BudgetStatus> {
        let project = self.get_project(project_id).await?;
        Ok(match project.budget {
            None => BudgetStatus {
                spent: 0.0,
                total: None,
                fraction_used: None,
                alert_threshold: None,
                over_alert_threshold: false,
            },
            Some(budget) => {
                let fraction = if budget.total > 0.0 {
                    Some(budget.spent / budget.total)
                } else {
                    None
                };
                BudgetStatus {
                    spent: budget.spent,
                    total: Some(budget.total),
                    fraction_used: fraction,
                    alert_threshold: Some(budget.alert_threshold),
                    over_alert_threshold: fraction
                        .map(|f| f >= budget.alert_threshold)
                        .unwrap_or(false),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Budget, Project};

    async fn seeded_with_budget() -> (StateStore, String) {
        let store = StateStore::connect_in_memory().await.unwrap();
        let mut project = Project::new("org".into(), "p".into(), "p".into());
        project.budget = Some(Budget {
            total: 100.0,
            spent: 0.0,
            currency: "USD".into(),
            alert_threshold: 0.8,
        });
        store.create_project(&project).await.unwrap();
        (store, project.id)
    }

    #[tokio::test]
    async fn record_cost_increments_project_spend() {
        let (store, project_id) = seeded_with_budget().await;
        store
            .record_cost(&project_id, "agent-a", None, "claude-3", 1000, 500, 12.5)
            .await
            .unwrap();
        store
            .record_cost(&project_id, "agent-a", None, "claude-3", 1000, 500, 12.5)
            .await
            .unwrap();

        let status = store.budget_status(&project_id).await.unwrap();
        assert_eq!(status.spent, 25.0);
        assert_eq!(status.fraction_used, Some(0.25));
        assert!(!status.over_alert_threshold);
    }

    #[tokio::test]
    async fn over_alert_threshold_flips_once_past_threshold() {
        let (store, project_id) = seeded_with_budget().await;
        store
            .record_cost(&project_id, "agent-a", None, "claude-3", 1, 1, 85.0)
            .await
            .unwrap();
        let status = store.budget_status(&project_id).await.unwrap();
        assert!(status.over_alert_threshold);
    }
}
