use super::{json_list, parse_dt, parse_json_list, StateStore};
use crate::models::{AccessRequest, AccessRole, AccessStatus, Agent};
use crate::{CoreError, Result};
use chrono::{Duration, Utc};
use sqlx::Row;
use uuid::Uuid;

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> AccessRequest {
    AccessRequest {
        id: row.get("id"),
        project_id: row.get("project_id"),
        agent_id: row.get("agent_id"),
        agent_name: row.get("agent_name"),
        agent_type: row.get("agent_type"),
        capabilities: parse_json_list(&row.get::<String, _>("capabilities")),
        requested_role: row
            .get::<String, _>("requested_role")
            .parse()
            .unwrap_or(AccessRole::Contributor),
        status: match row.get::<String, _>("status").as_str() {
            "approved" => AccessStatus::Approved,
            "denied" => AccessStatus::Denied,
            "expired" => AccessStatus::Expired,
            _ => AccessStatus::Pending,
        },
        expires_at: row.get::<Option<String>, _>("expires_at").map(|s| parse_dt(&s)),
        reviewer: row.get("reviewer"),
        denial_reason: row.get("denial_reason"),
        created_at: parse_dt(&row.get::<String, _>("created_at")),
        updated_at: parse_dt(&row.get::<String, _>("updated_at")),
    }
}

impl StateStore {
    /// Idempotent on the agent's latest request: a pending or approved
    /// request short-circuits to the existing row, and a denied or
    /// expired one is returned as-is so the caller can surface its
    /// reason, instead of queuing a second request behind it.
    pub async fn create_access_request(
        &self,
        project_id: &str,
        agent_id: &str,
        agent_name: &str,
        agent_type: &str,
        capabilities: Vec<String>,
        requested_role: AccessRole,
    ) -> Result<AccessRequest> {
        if let Some(existing) = self.latest_access_request(project_id, agent_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let request = AccessRequest {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            agent_type: agent_type.to_string(),
            capabilities,
            requested_role,
            status: AccessStatus::Pending,
            expires_at: None,
            reviewer: None,
            denial_reason: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO access_requests (id, project_id, agent_id, agent_name, agent_type,
                capabilities, requested_role, status, created_at, updated_at)
             VALUES (?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&request.id)
        .bind(&request.project_id)
        .bind(&request.agent_id)
        .bind(&request.agent_name)
        .bind(&request.agent_type)
        .bind(json_list(&request.capabilities))
        .bind(match request.requested_role {
            AccessRole::Lead => "lead",
            AccessRole::Contributor => "contributor",
            AccessRole::Reviewer => "reviewer",
            AccessRole::Observer => "observer",
        })
        .bind("pending")
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(request)
    }

    pub async fn latest_access_request(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Option<AccessRequest>> {
        let row = sqlx::query(
            "SELECT * FROM access_requests WHERE project_id = ? AND agent_id = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(project_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_request(&r)))
    }

    /// Queue position (1-based) among still-pending requests for this
    /// project, ordered by creation time.
    pub async fn pending_queue_position(&self, project_id: &str, request_id: &str) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT id FROM access_requests WHERE project_id = ? AND status = 'pending'
             ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .position(|r| r.get::<String, _>("id") == request_id)
            .map(|p| p as u64 + 1)
            .unwrap_or(0))
    }

    /// Approves a request; if no Agent row exists yet for this agent in
    /// this project, auto-registers one with zero cost and idle status.
    pub async fn approve_access_request(
        &self,
        project_id: &str,
        request_id: &str,
        reviewer: &str,
        expires_in_days: Option<i64>,
    ) -> Result<AccessRequest> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM access_requests WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("access request {request_id}")))?;
        let mut request = row_to_request(&row);
        request.status = AccessStatus::Approved;
        request.reviewer = Some(reviewer.to_string());
        request.expires_at = expires_in_days.map(|days| Utc::now() + Duration::days(days));
        request.updated_at = Utc::now();

        sqlx::query(
            "UPDATE access_requests SET status='approved', reviewer=?, expires_at=?, updated_at=?
             WHERE project_id=? AND id=?",
        )
        .bind(&request.reviewer)
        .bind(request.expires_at.map(|d| d.to_rfc3339()))
        .bind(request.updated_at.to_rfc3339())
        .bind(project_id)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        let existing_agent = sqlx::query("SELECT id FROM agents WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(&request.agent_id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing_agent.is_none() {
            let now = Utc::now();
            sqlx::query(
                "INSERT INTO agents (id, project_id, name, provider, model, status,
                    capabilities, input_cost_per_million, output_cost_per_million,
                    created_at, updated_at)
                 VALUES (?,?,?,?,?,'idle',?,0,0,?,?)",
            )
            .bind(&request.agent_id)
            .bind(project_id)
            .bind(&request.agent_name)
            .bind(&request.agent_type)
            .bind(&request.agent_type)
            .bind(json_list(&request.capabilities))
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(request)
    }

    pub async fn deny_access_request(
        &self,
        project_id: &str,
        request_id: &str,
        reviewer: &str,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE access_requests SET status='denied', reviewer=?, denial_reason=?, updated_at=?
             WHERE project_id=? AND id=?",
        )
        .bind(reviewer)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(project_id)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn has_approved_access(&self, project_id: &str, agent_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT expires_at FROM access_requests
             WHERE project_id = ? AND agent_id = ? AND status = 'approved'
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(project_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            None => false,
            Some(row) => match row.get::<Option<String>, _>("expires_at") {
                None => true,
                Some(raw) => parse_dt(&raw) > Utc::now(),
            },
        })
    }

    pub async fn expire_old_requests(&self, project_id: &str, older_than_hours: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::hours(older_than_hours);
        let result = sqlx::query(
            "UPDATE access_requests SET status='expired', updated_at=?
             WHERE project_id = ? AND status = 'pending' AND created_at < ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(project_id)
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_agent(&self, project_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| super::projects_agents::row_to_agent(&r)))
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
    async fn create_access_request_idempotent_on_pending() {
        let (store, project_id) = seeded().await;
        let first = store
            .create_access_request(
                &project_id,
                "agent-a",
                "Agent A",
                "claude-code",
                vec![],
                AccessRole::Contributor,
            )
            .await
            .unwrap();
        let second = store
            .create_access_request(
                &project_id,
                "agent-a",
                "Agent A",
                "claude-code",
                vec![],
                AccessRole::Contributor,
            )
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn approve_auto_registers_agent() {
        let (store, project_id) = seeded().await;
        let request = store
            .create_access_request(
                &project_id,
                "agent-a",
                "Agent A",
                "claude-code",
                vec![],
                AccessRole::Contributor,
            )
            .await
            .unwrap();
        store
            .approve_access_request(&project_id, &request.id, "lead", None)
            .await
            .unwrap();
        assert!(store.has_approved_access(&project_id, "agent-a").await.unwrap());
        let agent = store.get_agent(&project_id, "agent-a").await.unwrap();
        assert!(agent.is_some());
    }

    #[tokio::test]
    async fn create_request_after_denial_surfaces_reason_instead_of_requeuing() {
        let (store, project_id) = seeded().await;
        let request = store
            .create_access_request(
                &project_id,
                "agent-a",
                "Agent A",
                "claude-code",
                vec![],
                AccessRole::Contributor,
            )
            .await
            .unwrap();
        store
            .deny_access_request(&project_id, &request.id, "lead", "capabilities too broad")
            .await
            .unwrap();

        let retried = store
            .create_access_request(
                &project_id,
                "agent-a",
                "Agent A",
                "claude-code",
                vec![],
                AccessRole::Contributor,
            )
            .await
            .unwrap();
        assert_eq!(retried.id, request.id);
        assert_eq!(retried.status, AccessStatus::Denied);
        assert_eq!(retried.denial_reason.as_deref(), Some("capabilities too broad"));
    }
}
