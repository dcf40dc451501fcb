//! The tool surface external coding agents drive over HTTP: one route
//! per tool, each returning the `{content, isError}` reply shape agents
//! render as text.

use crate::auth::{auth_middleware, create_auth_state};
use crate::config::{ApiConfig, Config};
use crate::coordination::{build_context_bundle, render_markdown};
use crate::health::{classify_project, AgentHealth};
use crate::models::{AccessRole, Agent, AgentStatus, Priority, Task, TaskStatus};
use crate::rate_limit::{rate_limit_middleware, RateLimitConfig};
use crate::store::{LockStatus, StateStore, TaskFilters, TaskUpdate, ZoneManager};
use crate::{CoreError, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
}

#[derive(Debug, Serialize)]
pub struct ToolReply {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    fn json(value: &impl Serialize) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string()))
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: message.into() }],
            is_error: true,
        }
    }
}

fn reply_from(result: Result<ToolReply>) -> ToolReply {
    match result {
        Ok(reply) => reply,
        Err(e) => ToolReply::error(e.to_string()),
    }
}

/// Stateless view over [`StateStore`] that implements every tool and
/// resource the coordination API exposes. Cheap to clone — holds only a
/// pooled store handle and the coordination-relevant config slice.
#[derive(Clone)]
pub struct CoordinationServer {
    store: StateStore,
    checkpoint_every_n_tasks: u32,
}

impl CoordinationServer {
    pub fn new(store: StateStore, config: &Config) -> Self {
        Self {
            store,
            checkpoint_every_n_tasks: config.coordination.checkpoint_every_n_tasks,
        }
    }

    pub async fn list_tasks(&self, project_id: &str, filters: TaskFilters) -> Result<ToolReply> {
        let tasks = self.store.list_tasks(project_id, &filters).await?;
        Ok(ToolReply::json(&tasks))
    }

    pub async fn get_task(&self, project_id: &str, task_id: &str) -> Result<ToolReply> {
        let task = self.store.get_task(project_id, task_id).await?;
        Ok(ToolReply::json(&task))
    }

    /// Claims a task, records the claim, and returns the rendered
    /// context bundle — welcome header on an agent's first claim, a
    /// checkpoint marker every `checkpoint_every_n_tasks` claims.
    pub async fn claim_task(
        &self,
        project_id: &str,
        task_id: &str,
        agent_id: &str,
        agent_type: &str,
    ) -> Result<ToolReply> {
        self.ensure_agent_registered(project_id, agent_id, agent_type).await?;

        let claimed = self.store.claim_task(project_id, task_id, agent_id).await?;
        if !claimed {
            let task = self.store.get_task(project_id, task_id).await?;
            return Ok(ToolReply::error(format!(
                "task {task_id} is not claimable (status: {}, assignee: {:?})",
                task.status.as_str(),
                task.assignee
            )));
        }

        let is_first_task = self.store.is_first_task_for_agent(project_id, agent_id).await?;
        self.store.record_task_claim(project_id, agent_id, task_id).await?;
        let claim_count = self.store.count_task_claims(project_id, agent_id).await?;
        let checkpoint_marker = self.checkpoint_every_n_tasks > 0
            && claim_count % self.checkpoint_every_n_tasks as u64 == 0;

        let bundle = self.render_bundle_for(project_id, task_id, is_first_task).await?;
        Ok(ToolReply::text(render_markdown(&bundle, checkpoint_marker)))
    }

    pub async fn refresh_context(
        &self,
        project_id: &str,
        task_id: &str,
        agent_id: &str,
    ) -> Result<ToolReply> {
        let is_first_task = self.store.is_first_task_for_agent(project_id, agent_id).await?;
        let bundle = self.render_bundle_for(project_id, task_id, is_first_task).await?;
        Ok(ToolReply::text(render_markdown(&bundle, false)))
    }

    async fn render_bundle_for(
        &self,
        project_id: &str,
        task_id: &str,
        is_first_task: bool,
    ) -> Result<crate::coordination::ContextBundle> {
        let project = self.store.get_project(project_id).await?;
        let task = self.store.get_task(project_id, task_id).await?;
        let all_tasks = self.store.list_tasks(project_id, &TaskFilters::default()).await?;
        let onboarding = self.store.get_onboarding(project_id).await?;
        Ok(build_context_bundle(
            &project.name,
            onboarding.as_ref(),
            &task,
            &all_tasks,
            is_first_task,
        ))
    }

    pub async fn update_task(
        &self,
        project_id: &str,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<ToolReply> {
        let task = self.store.update_task(project_id, task_id, update).await?;
        Ok(ToolReply::json(&task))
    }

    pub async fn lock_file(
        &self,
        project_id: &str,
        file_path: &str,
        agent_id: &str,
        ttl_seconds: i64,
    ) -> Result<ToolReply> {
        let acquired = self
            .store
            .acquire_lock(project_id, file_path, agent_id, ttl_seconds)
            .await?;
        if acquired {
            return Ok(ToolReply::text(format!("locked {file_path}")));
        }
        let status = self.store.check_lock(project_id, file_path).await?;
        Ok(ToolReply::error(format!(
            "{file_path} is held by {:?} until {:?}",
            status.holder, status.expires_at
        )))
    }

    pub async fn release_lock(&self, project_id: &str, file_path: &str, agent_id: &str) -> Result<ToolReply> {
        let released = self.store.release_lock(project_id, file_path, agent_id).await?;
        if released {
            Ok(ToolReply::text(format!("released {file_path}")))
        } else {
            Ok(ToolReply::error(format!("{agent_id} does not hold {file_path}")))
        }
    }

    /// `check_locks(filePaths[])` — the spec's tool table takes an array
    /// of paths and returns a per-file lock summary.
    pub async fn check_locks(&self, project_id: &str, file_paths: &[String]) -> Result<ToolReply> {
        let statuses = self.store.check_locks(project_id, file_paths).await?;
        let summary: std::collections::HashMap<&String, &LockStatus> =
            file_paths.iter().zip(statuses.iter()).collect();
        Ok(ToolReply::json(&summary))
    }

    pub async fn request_access(
        &self,
        project_id: &str,
        agent_id: &str,
        agent_name: &str,
        agent_type: &str,
        capabilities: Vec<String>,
        requested_role: AccessRole,
    ) -> Result<ToolReply> {
        let request = self
            .store
            .create_access_request(project_id, agent_id, agent_name, agent_type, capabilities, requested_role)
            .await?;
        Ok(ToolReply::json(&request))
    }

    pub async fn check_access(&self, project_id: &str, agent_id: &str) -> Result<ToolReply> {
        let Some(request) = self.store.latest_access_request(project_id, agent_id).await? else {
            return Ok(ToolReply::text("no access request on file"));
        };
        let body = match request.status {
            crate::models::AccessStatus::Approved => json!({"status": "approved", "expiresAt": request.expires_at}),
            crate::models::AccessStatus::Denied => {
                json!({"status": "denied", "reason": request.denial_reason})
            }
            crate::models::AccessStatus::Expired => json!({"status": "expired"}),
            crate::models::AccessStatus::Pending => {
                let position = self.store.pending_queue_position(project_id, &request.id).await?;
                json!({"status": "pending", "queuePosition": position})
            }
        };
        Ok(ToolReply::json(&body))
    }

    pub async fn report_usage(
        &self,
        project_id: &str,
        agent_id: &str,
        task_id: Option<&str>,
        tokens_in: u64,
        tokens_out: u64,
    ) -> Result<ToolReply> {
        let agent = self
            .store
            .get_agent(project_id, agent_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("agent {agent_id}")))?;
        let cost = (tokens_in as f64 / 1_000_000.0) * agent.input_cost_per_million
            + (tokens_out as f64 / 1_000_000.0) * agent.output_cost_per_million;
        self.store
            .record_cost(project_id, agent_id, task_id, &agent.model, tokens_in, tokens_out, cost)
            .await?;
        let budget = self.store.budget_status(project_id).await?;
        Ok(ToolReply::json(&json!({"costUsd": cost, "budget": budget})))
    }

    pub async fn get_budget(&self, project_id: &str) -> Result<ToolReply> {
        let budget = self.store.budget_status(project_id).await?;
        Ok(ToolReply::json(&budget))
    }

    pub async fn heartbeat(
        &self,
        project_id: &str,
        agent_id: &str,
        status: Option<AgentStatus>,
    ) -> Result<ToolReply> {
        self.store.touch_heartbeat(project_id, agent_id).await?;
        if let Some(status) = status {
            self.store.update_agent_status(project_id, agent_id, status).await?;
        }
        Ok(ToolReply::text("ok"))
    }

    pub async fn list_agents(&self, project_id: &str) -> Result<ToolReply> {
        let agents = self.store.list_agents(project_id).await?;
        Ok(ToolReply::json(&agents))
    }

    pub async fn get_onboarding_config(&self, project_id: &str) -> Result<ToolReply> {
        match self.store.get_onboarding(project_id).await? {
            Some(config) => Ok(ToolReply::json(&config)),
            None => Ok(ToolReply::text("no onboarding configuration set for this project")),
        }
    }

    pub async fn get_zones(&self, project_id: &str) -> Result<ToolReply> {
        let onboarding = self.store.get_onboarding(project_id).await?.unwrap_or_default();
        let manager = ZoneManager::new(onboarding.zones);
        Ok(ToolReply::json(&manager.zones()))
    }

    pub async fn health_status(&self, project_id: &str, thresholds: &crate::config::HealthThresholds) -> Result<ToolReply> {
        let statuses: Vec<AgentHealth> = classify_project(&self.store, project_id, thresholds).await?;
        Ok(ToolReply::json(&statuses))
    }

    pub async fn project_status(&self, project_id: &str) -> Result<Value> {
        let project = self.store.get_project(project_id).await?;
        let tasks = self.store.list_tasks(project_id, &TaskFilters::default()).await?;
        let agents = self.store.list_agents(project_id).await?;
        let budget = self.store.budget_status(project_id).await?;

        let mut counts = std::collections::HashMap::new();
        for task in &tasks {
            *counts.entry(task.status.as_str()).or_insert(0u64) += 1;
        }

        Ok(json!({
            "project": project,
            "tasks": {
                "total": tasks.len(),
                "pending": counts.get("pending").copied().unwrap_or(0),
                "claimed": counts.get("claimed").copied().unwrap_or(0),
                "inProgress": counts.get("in_progress").copied().unwrap_or(0),
                "completed": counts.get("completed").copied().unwrap_or(0),
                "failed": counts.get("failed").copied().unwrap_or(0),
                "blocked": counts.get("blocked").copied().unwrap_or(0),
            },
            "agents": agents,
            "budget": if project.budget.is_some() {
                json!({
                    "spent": budget.spent,
                    "total": budget.total,
                    "percentUsed": budget.fraction_used.map(|f| f * 100.0),
                    "alertThreshold": budget.alert_threshold,
                    "remaining": budget.total.map(|t| t - budget.spent),
                })
            } else {
                Value::Null
            },
        }))
    }

    async fn ensure_agent_registered(&self, project_id: &str, agent_id: &str, agent_type: &str) -> Result<()> {
        if self.store.get_agent(project_id, agent_id).await?.is_some() {
            return Ok(());
        }
        let agent = Agent::new(
            project_id.to_string(),
            agent_id.to_string(),
            agent_id.to_string(),
            agent_type.to_string(),
            agent_type.to_string(),
        );
        self.store.register_agent(&agent).await?;
        Ok(())
    }
}

#[derive(Clone)]
struct AppState {
    server: CoordinationServer,
    health_thresholds: crate::config::HealthThresholds,
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    status: Option<TaskStatus>,
    priority: Option<Priority>,
    assignee: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaimTaskBody {
    agent_id: String,
    agent_type: String,
}

#[derive(Debug, Deserialize)]
struct UpdateTaskBody {
    status: Option<TaskStatus>,
    notes: Option<String>,
    actual_tokens: Option<u64>,
    blocked_by: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct LockBody {
    file_path: String,
    agent_id: String,
    #[serde(default = "default_lock_ttl")]
    ttl_seconds: i64,
}

fn default_lock_ttl() -> i64 {
    crate::constants::DEFAULT_LOCK_TTL_SECS
}

#[derive(Debug, Deserialize)]
struct UnlockBody {
    file_path: String,
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct CheckLocksBody {
    file_paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AccessRequestBody {
    agent_id: String,
    agent_name: String,
    agent_type: String,
    #[serde(default)]
    capabilities: Vec<String>,
    requested_role: AccessRole,
}

#[derive(Debug, Deserialize)]
struct AgentIdBody {
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    agent_id: String,
    task_id: Option<String>,
    tokens_in: u64,
    tokens_out: u64,
}

#[derive(Debug, Deserialize)]
struct HeartbeatBody {
    agent_id: String,
    status: Option<AgentStatus>,
}

#[derive(Debug, Deserialize)]
struct RefreshContextBody {
    task_id: String,
    agent_id: String,
}

pub fn build_router(server: CoordinationServer, api_config: &ApiConfig, health_thresholds: crate::config::HealthThresholds) -> Router {
    let auth_state = create_auth_state(api_config.clone());
    let rate_limits = RateLimitConfig::new();

    let cors = CorsLayer::new()
        .allow_origin(
            api_config
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderName::from_static("x-api-key"),
        ]);

    let state = AppState { server, health_thresholds };

    Router::new()
        .route("/projects/{project_id}/tasks", get(h_list_tasks))
        .route("/projects/{project_id}/tasks/{task_id}", get(h_get_task))
        .route("/projects/{project_id}/tasks/{task_id}/claim", post(h_claim_task))
        .route("/projects/{project_id}/tasks/{task_id}/update", post(h_update_task))
        .route("/projects/{project_id}/tasks/{task_id}/refresh-context", post(h_refresh_context))
        .route("/projects/{project_id}/locks/acquire", post(h_lock_file))
        .route("/projects/{project_id}/locks/release", post(h_release_lock))
        .route("/projects/{project_id}/locks/check", post(h_check_locks))
        .route("/projects/{project_id}/access/request", post(h_request_access))
        .route("/projects/{project_id}/access/check", post(h_check_access))
        .route("/projects/{project_id}/usage/report", post(h_report_usage))
        .route("/projects/{project_id}/budget", get(h_get_budget))
        .route("/projects/{project_id}/heartbeat", post(h_heartbeat))
        .route("/projects/{project_id}/agents", get(h_list_agents))
        .route("/projects/{project_id}/onboarding", get(h_onboarding))
        .route("/projects/{project_id}/zones", get(h_zones))
        .route("/projects/{project_id}/health", get(h_health_status))
        .route("/projects/{project_id}/status", get(h_project_status))
        .layer(
            tower::ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(rate_limits, rate_limit_middleware))
                .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn h_list_tasks(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    axum::extract::Query(q): axum::extract::Query<ListTasksQuery>,
) -> Json<ToolReply> {
    let filters = TaskFilters {
        status: q.status,
        priority: q.priority,
        assignee: q.assignee,
    };
    Json(reply_from(state.server.list_tasks(&project_id, filters).await))
}

async fn h_get_task(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(String, String)>,
) -> Json<ToolReply> {
    Json(reply_from(state.server.get_task(&project_id, &task_id).await))
}

async fn h_claim_task(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(String, String)>,
    Json(body): Json<ClaimTaskBody>,
) -> Json<ToolReply> {
    Json(reply_from(
        state
            .server
            .claim_task(&project_id, &task_id, &body.agent_id, &body.agent_type)
            .await,
    ))
}

async fn h_update_task(
    State(state): State<AppState>,
    Path((project_id, task_id)): Path<(String, String)>,
    Json(body): Json<UpdateTaskBody>,
) -> Json<ToolReply> {
    let update = TaskUpdate {
        status: body.status,
        notes: body.notes,
        actual_tokens: body.actual_tokens,
        blocked_by: body.blocked_by,
    };
    Json(reply_from(state.server.update_task(&project_id, &task_id, update).await))
}

async fn h_refresh_context(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<RefreshContextBody>,
) -> Json<ToolReply> {
    Json(reply_from(
        state.server.refresh_context(&project_id, &body.task_id, &body.agent_id).await,
    ))
}

async fn h_lock_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<LockBody>,
) -> Json<ToolReply> {
    Json(reply_from(
        state
            .server
            .lock_file(&project_id, &body.file_path, &body.agent_id, body.ttl_seconds)
            .await,
    ))
}

async fn h_release_lock(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<UnlockBody>,
) -> Json<ToolReply> {
    Json(reply_from(
        state.server.release_lock(&project_id, &body.file_path, &body.agent_id).await,
    ))
}

async fn h_check_locks(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<CheckLocksBody>,
) -> Json<ToolReply> {
    Json(reply_from(state.server.check_locks(&project_id, &body.file_paths).await))
}

async fn h_request_access(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<AccessRequestBody>,
) -> Json<ToolReply> {
    Json(reply_from(
        state
            .server
            .request_access(
                &project_id,
                &body.agent_id,
                &body.agent_name,
                &body.agent_type,
                body.capabilities,
                body.requested_role,
            )
            .await,
    ))
}

async fn h_check_access(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<AgentIdBody>,
) -> Json<ToolReply> {
    Json(reply_from(state.server.check_access(&project_id, &body.agent_id).await))
}

async fn h_report_usage(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<UsageBody>,
) -> Json<ToolReply> {
    Json(reply_from(
        state
            .server
            .report_usage(&project_id, &body.agent_id, body.task_id.as_deref(), body.tokens_in, body.tokens_out)
            .await,
    ))
}

async fn h_get_budget(State(state): State<AppState>, Path(project_id): Path<String>) -> Json<ToolReply> {
    Json(reply_from(state.server.get_budget(&project_id).await))
}

async fn h_heartbeat(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> Json<ToolReply> {
    Json(reply_from(state.server.heartbeat(&project_id, &body.agent_id, body.status).await))
}

async fn h_list_agents(State(state): State<AppState>, Path(project_id): Path<String>) -> Json<ToolReply> {
    Json(reply_from(state.server.list_agents(&project_id).await))
}

async fn h_onboarding(State(state): State<AppState>, Path(project_id): Path<String>) -> Json<ToolReply> {
    Json(reply_from(state.server.get_onboarding_config(&project_id).await))
}

async fn h_zones(State(state): State<AppState>, Path(project_id): Path<String>) -> Json<ToolReply> {
    Json(reply_from(state.server.get_zones(&project_id).await))
}

async fn h_health_status(State(state): State<AppState>, Path(project_id): Path<String>) -> Json<ToolReply> {
    Json(reply_from(
        state.server.health_status(&project_id, &state.health_thresholds).await,
    ))
}

async fn h_project_status(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> std::result::Result<Json<Value>, StatusCode> {
    match state.server.project_status(&project_id).await {
        Ok(body) => Ok(Json(body)),
        Err(CoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            info!("project status lookup failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, Task};

    async fn seeded() -> (CoordinationServer, String) {
        let store = StateStore::connect_in_memory().await.unwrap();
        let project = Project::new("org".into(), "p".into(), "p".into());
        store.create_project(&project).await.unwrap();
        let config = Config {
            database: crate::config::DatabaseConfig { path: ":memory:".into() },
            api: ApiConfig {
                host: "127.0.0.1".into(),
                port: 0,
                api_key: None,
                allowed_origins: vec![],
            },
            coordination: crate::config::CoordinationConfig {
                checkpoint_every_n_tasks: 2,
                ..Default::default()
            },
            sandbox: Default::default(),
            health: Default::default(),
        };
        (CoordinationServer::new(store, &config), project.id)
    }

    #[tokio::test]
    async fn claim_task_registers_agent_and_returns_bundle() {
        let (server, project_id) = seeded().await;
        let task = Task::new(project_id.clone(), "Do thing".into(), "desc".into(), Priority::Medium);
        server.store.create_task(&task).await.unwrap();

        let reply = server
            .claim_task(&project_id, &task.id, "agent-1", "claude-code")
            .await
            .unwrap();
        assert!(!reply.is_error);

        let agent = server.store.get_agent(&project_id, "agent-1").await.unwrap();
        assert!(agent.is_some());
    }

    #[tokio::test]
    async fn claim_twice_fails_second_time() {
        let (server, project_id) = seeded().await;
        let task = Task::new(project_id.clone(), "Do thing".into(), "desc".into(), Priority::Medium);
        server.store.create_task(&task).await.unwrap();

        server.claim_task(&project_id, &task.id, "agent-1", "claude-code").await.unwrap();
        let second = server.claim_task(&project_id, &task.id, "agent-2", "claude-code").await.unwrap();
        assert!(second.is_error);
    }

    #[tokio::test]
    async fn lock_conflict_surfaces_holder() {
        let (server, project_id) = seeded().await;
        server.lock_file(&project_id, "a.rs", "agent-1", 300).await.unwrap();
        let blocked = server.lock_file(&project_id, "a.rs", "agent-2", 300).await.unwrap();
        assert!(blocked.is_error);
    }

    #[tokio::test]
    async fn check_locks_reports_holder_for_each_path() {
        let (server, project_id) = seeded().await;
        server.lock_file(&project_id, "src/x.ts", "agent-1", 60).await.unwrap();

        let reply = server
            .check_locks(&project_id, &["src/x.ts".to_string(), "src/y.ts".to_string()])
            .await
            .unwrap();
        assert!(!reply.is_error);
        let ToolContent::Text { text } = &reply.content[0];
        assert!(text.contains("src/x.ts"));
        assert!(text.contains("agent-1"));
        assert!(text.contains("src/y.ts"));
    }
}
