use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Conflict resolution strategy a project declares as its default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    Lock,
    Merge,
    Zone,
    Review,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Lock => "lock",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Zone => "zone",
            ConflictStrategy::Review => "review",
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock" => Ok(ConflictStrategy::Lock),
            "merge" => Ok(ConflictStrategy::Merge),
            "zone" => Ok(ConflictStrategy::Zone),
            "review" => Ok(ConflictStrategy::Review),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Budget {
    pub total: f64,
    pub spent: f64,
    pub currency: String,
    pub alert_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub slug: String,
    pub root_path: Option<String>,
    pub git_remote: Option<String>,
    pub git_branch: Option<String>,
    pub conflict_strategy: ConflictStrategy,
    pub budget: Option<Budget>,
    pub settings: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(organization_id: String, name: String, slug: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id,
            name,
            slug,
            root_path: None,
            git_remote: None,
            git_branch: None,
            conflict_strategy: ConflictStrategy::Lock,
            budget: None,
            settings: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "working" => Ok(AgentStatus::Working),
            "blocked" => Ok(AgentStatus::Blocked),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
    pub quota: Option<f64>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        project_id: String,
        id: String,
        name: String,
        provider: String,
        model: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            name,
            provider,
            model,
            status: AgentStatus::Idle,
            capabilities: Vec::new(),
            input_cost_per_million: 0.0,
            output_cost_per_million: 0.0,
            quota: None,
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    InProgress,
    Completed,
    Failed,
    Blocked,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Non-pending statuses always carry an assignee (invariant 1).
    pub fn requires_assignee(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "claimed" => Ok(TaskStatus::Claimed),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "blocked" => Ok(TaskStatus::Blocked),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Rank used for `list` ordering: critical > high > medium > low.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dependencies: Vec<String>,
    pub blocked_by: Vec<String>,
    pub files: Vec<String>,
    pub tags: Vec<String>,
    pub estimated_tokens: Option<u64>,
    pub actual_tokens: Option<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        project_id: String,
        title: String,
        description: String,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            title,
            description,
            status: TaskStatus::Pending,
            priority,
            assignee: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            dependencies: Vec::new(),
            blocked_by: Vec::new(),
            files: Vec::new(),
            tags: Vec::new(),
            estimated_tokens: None,
            actual_tokens: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn reassignment_count(&self) -> u64 {
        self.metadata
            .get("reassignmentCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    pub project_id: String,
    pub file_path: String,
    pub holder: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Accepted,
    Rejected,
    Merged,
    Waiting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConflict {
    pub project_id: String,
    pub file_path: String,
    pub agents: Vec<String>,
    pub strategy: ConflictStrategy,
    pub resolution: Option<ConflictResolution>,
    pub resolver: Option<String>,
}

/// Action a given conflict strategy resolves to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    Wait,
    Merge,
    Human,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEvent {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessRole {
    Lead,
    Contributor,
    Reviewer,
    Observer,
}

impl std::str::FromStr for AccessRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(AccessRole::Lead),
            "contributor" => Ok(AccessRole::Contributor),
            "reviewer" => Ok(AccessRole::Reviewer),
            "observer" => Ok(AccessRole::Observer),
            other => Err(format!("unknown access role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub requested_role: AccessRole,
    pub status: AccessStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub reviewer: Option<String>,
    pub denial_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    Manual,
    Auto,
    ContextExhaustion,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointContext {
    pub files_modified: Vec<String>,
    pub completed_steps: Vec<String>,
    pub next_steps: Vec<String>,
    pub blockers: Vec<String>,
    pub token_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub checkpoint_type: CheckpointType,
    pub stage: String,
    pub context: CheckpointContext,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskHistoryEntry {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub task_id: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Running,
    Stopped,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInstance {
    pub id: String,
    pub agent_id: String,
    pub project_id: String,
    pub template: String,
    pub status: SandboxStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// A glob-bounded subset of the repository with ownership and read-only
/// semantics. Order matters — more specific patterns must be listed
/// before more general ones (`ZoneManager::owner_of` is first-match-wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub pattern: String,
    pub owner: Option<String>,
    #[serde(default)]
    pub readonly: bool,
}

/// Per-project agent briefing, surfaced through `get_onboarding_config`
/// and folded into every context bundle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectOnboarding {
    pub welcome_message: Option<String>,
    pub project_goals: Vec<String>,
    pub agent_instructions: Option<String>,
    pub style_guide: Option<String>,
    pub checkpoint_rules: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub denied_paths: Vec<String>,
    pub zones: Vec<Zone>,
}
