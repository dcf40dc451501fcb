//! Per-agent-type installation and run recipes layered on top of
//! [`SandboxManager`]. `AgentRunner` owns the agent-id → sandbox-id
//! mapping and drops entries the moment the sandbox reports itself
//! stopped, failed, or timed out — mirroring the event-coupling pattern
//! `HealthMonitor` uses for heartbeat transitions.

use crate::sandbox::{ExecOptions, ExecOutput, SandboxEventKind, SandboxManager, StreamCallbacks};
use crate::{CoreError, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Recognized agent personas. `Custom` carries the caller-supplied run
/// command verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentType {
    ClaudeCode,
    Aider,
    Copilot,
    Crush,
    Zencoder,
    Custom(String),
}

impl FromStr for AgentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "claude-code" => AgentType::ClaudeCode,
            "aider" => AgentType::Aider,
            "copilot" => AgentType::Copilot,
            "crush" => AgentType::Crush,
            "zencoder" | "zai" => AgentType::Zencoder,
            "custom" => AgentType::Custom(String::new()),
            other => AgentType::Custom(other.to_string()),
        })
    }
}

/// Per-type install commands (tolerant of failure — logged, never fatal)
/// and the command used to actually run the agent.
struct AgentRecipe {
    setup_commands: Vec<&'static str>,
    run_command: &'static str,
}

fn recipe_for(agent_type: &AgentType) -> AgentRecipe {
    match agent_type {
        AgentType::ClaudeCode => AgentRecipe {
            setup_commands: vec!["npm install -g @anthropic-ai/claude-code"],
            run_command: "claude --print",
        },
        AgentType::Aider => AgentRecipe {
            setup_commands: vec!["pip install aider-chat"],
            run_command: "aider --yes",
        },
        AgentType::Copilot => AgentRecipe {
            setup_commands: vec!["npm install -g @githubnext/github-copilot-cli"],
            run_command: "github-copilot-cli",
        },
        AgentType::Crush => AgentRecipe {
            setup_commands: vec!["npm install -g @charmbracelet/crush"],
            run_command: "crush run",
        },
        AgentType::Zencoder => AgentRecipe {
            setup_commands: vec!["npm install -g zencoder-cli"],
            run_command: "zencoder run",
        },
        AgentType::Custom(_) => AgentRecipe { setup_commands: vec![], run_command: "" },
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub agent_id: String,
    pub project_id: String,
    pub template: String,
    pub git_repo: Option<String>,
    pub git_branch: Option<String>,
    pub custom_setup_commands: Vec<String>,
    pub custom_run_command: Option<String>,
    pub deadline_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RunningAgent {
    pub agent_id: String,
    pub sandbox_id: String,
    pub agent_type: String,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl From<ExecOutput> for RunOutcome {
    fn from(o: ExecOutput) -> Self {
        Self {
            success: o.exit_code == 0,
            exit_code: o.exit_code,
            stdout: o.stdout,
            stderr: o.stderr,
            duration_ms: o.duration_ms,
            error: None,
        }
    }
}

pub struct AgentRunner {
    sandboxes: SandboxManager,
    running: Arc<RwLock<HashMap<String, RunningAgent>>>,
}

impl AgentRunner {
    /// Subscribes to the manager's lifecycle events so a sandbox going
    /// `stopped`/`failed`/`timeout` always drops the running-agent record,
    /// whether or not `stop_agent` was called explicitly.
    pub async fn new(sandboxes: SandboxManager) -> Self {
        let running: Arc<RwLock<HashMap<String, RunningAgent>>> = Arc::new(RwLock::new(HashMap::new()));
        let running_for_events = Arc::clone(&running);
        sandboxes
            .on_event(move |event| {
                if !matches!(event.kind, SandboxEventKind::Stopped | SandboxEventKind::Failed | SandboxEventKind::Timeout) {
                    return;
                }
                let running = Arc::clone(&running_for_events);
                let agent_id = event.agent_id.clone();
                tokio::spawn(async move {
                    running.write().await.remove(&agent_id);
                });
            })
            .await;
        Self { sandboxes, running }
    }

    pub async fn is_agent_running(&self, agent_id: &str) -> bool {
        self.running.read().await.contains_key(agent_id)
    }

    pub async fn get_running_agent(&self, agent_id: &str) -> Option<RunningAgent> {
        self.running.read().await.get(agent_id).cloned()
    }

    pub async fn list_running_agents(&self) -> Vec<RunningAgent> {
        self.running.read().await.values().cloned().collect()
    }

    /// Provisions a sandbox, clones the repo if configured, and runs the
    /// type's (tolerant-of-failure) install commands followed by any
    /// caller-supplied setup commands, which DO propagate failures. Tears
    /// down the sandbox and re-raises on any hard failure.
    pub async fn start_agent(&self, config: AgentConfig, agent_type: AgentType) -> Result<String> {
        if self.is_agent_running(&config.agent_id).await {
            return Err(CoreError::Conflict(format!("agent {} is already running", config.agent_id)));
        }

        let sandbox_id = self
            .sandboxes
            .create_sandbox(&config.agent_id, &config.project_id, &config.template, config.deadline_secs)
            .await?;

        let mut env = HashMap::new();
        env.insert("MCP_URL".to_string(), "http://127.0.0.1:4500".to_string());
        env.insert("AGENT_ID".to_string(), config.agent_id.clone());
        env.insert("PROJECT_ID".to_string(), config.project_id.clone());

        if let Err(e) = self.provision_workspace(&sandbox_id, &config, &agent_type, &env).await {
            let _ = self.sandboxes.fail_sandbox(&sandbox_id, &e.to_string()).await;
            return Err(e);
        }

        self.running.write().await.insert(
            config.agent_id.clone(),
            RunningAgent { agent_id: config.agent_id.clone(), sandbox_id: sandbox_id.clone(), agent_type: type_label(&agent_type) },
        );

        Ok(sandbox_id)
    }

    async fn provision_workspace(
        &self,
        sandbox_id: &str,
        config: &AgentConfig,
        agent_type: &AgentType,
        env: &HashMap<String, String>,
    ) -> Result<()> {
        if let Some(repo) = &config.git_repo {
            let mut clone_cmd = "git clone ".to_string();
            if let Some(branch) = &config.git_branch {
                clone_cmd.push_str(&format!("-b {branch} "));
            }
            clone_cmd.push_str(&format!("{repo} ."));
            self.sandboxes
                .execute_command(
                    sandbox_id,
                    &clone_cmd,
                    ExecOptions { timeout_secs: crate::constants::GIT_CLONE_TIMEOUT_SECS, env: env.clone(), cwd: None },
                )
                .await?;
        }

        let recipe = recipe_for(agent_type);
        for setup_cmd in &recipe.setup_commands {
            let outcome = self
                .sandboxes
                .execute_command(sandbox_id, setup_cmd, ExecOptions { timeout_secs: 300, env: env.clone(), cwd: None })
                .await;
            if let Err(e) = outcome {
                warn!("setup command `{}` failed (tolerated): {}", setup_cmd, e);
            }
        }

        for setup_cmd in &config.custom_setup_commands {
            self.sandboxes
                .execute_command(sandbox_id, setup_cmd, ExecOptions { timeout_secs: 300, env: env.clone(), cwd: None })
                .await?;
        }

        Ok(())
    }

    /// `start_agent` followed by the type's run command, always tearing
    /// down the sandbox afterward regardless of outcome.
    pub async fn run_agent(&self, config: AgentConfig, agent_type: AgentType) -> Result<RunOutcome> {
        let agent_id = config.agent_id.clone();
        let sandbox_id = self.start_agent(config.clone(), agent_type.clone()).await?;

        let run_command = config
            .custom_run_command
            .clone()
            .unwrap_or_else(|| recipe_for(&agent_type).run_command.to_string());

        let result = self
            .sandboxes
            .execute_command(&sandbox_id, &run_command, ExecOptions { timeout_secs: 3600, ..Default::default() })
            .await;

        let outcome = match result {
            Ok(output) => RunOutcome::from(output),
            Err(e) => RunOutcome { success: false, exit_code: -1, stdout: String::new(), stderr: String::new(), duration_ms: 0, error: Some(e.to_string()) },
        };

        if let Err(e) = self.stop_agent(&agent_id).await {
            warn!("failed to tear down sandbox for {}: {}", agent_id, e);
        }

        Ok(outcome)
    }

    pub async fn run_agent_streaming(&self, config: AgentConfig, agent_type: AgentType, callbacks: StreamCallbacks) -> Result<RunOutcome> {
        let agent_id = config.agent_id.clone();
        let sandbox_id = self.start_agent(config.clone(), agent_type.clone()).await?;

        let run_command = config
            .custom_run_command
            .clone()
            .unwrap_or_else(|| recipe_for(&agent_type).run_command.to_string());

        let result = self
            .sandboxes
            .execute_command_streaming(&sandbox_id, &run_command, ExecOptions { timeout_secs: 3600, ..Default::default() }, callbacks)
            .await;

        let outcome = match result {
            Ok(output) => RunOutcome::from(output),
            Err(e) => RunOutcome { success: false, exit_code: -1, stdout: String::new(), stderr: String::new(), duration_ms: 0, error: Some(e.to_string()) },
        };

        if let Err(e) = self.stop_agent(&agent_id).await {
            warn!("failed to tear down sandbox for {}: {}", agent_id, e);
        }

        Ok(outcome)
    }

    /// Runs a one-shot command in an already-running agent's sandbox.
    pub async fn execute_in_agent(&self, agent_id: &str, cmd: &str, timeout_secs: u64) -> Result<ExecOutput> {
        let sandbox_id = self.sandbox_id_for(agent_id).await?;
        self.sandboxes.execute_command(&sandbox_id, cmd, ExecOptions { timeout_secs, ..Default::default() }).await
    }

    pub async fn execute_in_agent_streaming(&self, agent_id: &str, cmd: &str, timeout_secs: u64, callbacks: StreamCallbacks) -> Result<ExecOutput> {
        let sandbox_id = self.sandbox_id_for(agent_id).await?;
        self.sandboxes
            .execute_command_streaming(&sandbox_id, cmd, ExecOptions { timeout_secs, ..Default::default() }, callbacks)
            .await
    }

    async fn sandbox_id_for(&self, agent_id: &str) -> Result<String> {
        self.running
            .read()
            .await
            .get(agent_id)
            .map(|r| r.sandbox_id.clone())
            .ok_or_else(|| CoreError::not_found(format!("running agent {agent_id}")))
    }

    pub async fn stop_agent(&self, agent_id: &str) -> Result<()> {
        let sandbox_id = self.sandbox_id_for(agent_id).await?;
        self.sandboxes.stop_sandbox(&sandbox_id).await?;
        self.running.write().await.remove(agent_id);
        info!("stopped agent {}", agent_id);
        Ok(())
    }

    pub async fn stop_all_agents(&self) {
        let agent_ids: Vec<String> = self.running.read().await.keys().cloned().collect();
        for agent_id in agent_ids {
            if let Err(e) = self.stop_agent(&agent_id).await {
                warn!("failed to stop agent {}: {}", agent_id, e);
            }
        }
    }
}

fn type_label(agent_type: &AgentType) -> String {
    match agent_type {
        AgentType::ClaudeCode => "claude-code".to_string(),
        AgentType::Aider => "aider".to_string(),
        AgentType::Copilot => "copilot".to_string(),
        AgentType::Crush => "crush".to_string(),
        AgentType::Zencoder => "zencoder".to_string(),
        AgentType::Custom(label) => label.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ProcessBackend;

    fn runner_parts() -> SandboxManager {
        SandboxManager::new(Arc::new(ProcessBackend::new()), 4, true)
    }

    #[test]
    fn zencoder_alias_resolves() {
        assert_eq!(AgentType::from_str("zai").unwrap(), AgentType::Zencoder);
        assert_eq!(AgentType::from_str("zencoder").unwrap(), AgentType::Zencoder);
    }

    #[test]
    fn unknown_type_becomes_custom() {
        assert_eq!(AgentType::from_str("goose").unwrap(), AgentType::Custom("goose".into()));
    }

    #[tokio::test]
    async fn start_agent_twice_fails_second_time() {
        let runner = AgentRunner::new(runner_parts()).await;
        let config = AgentConfig { agent_id: "a1".into(), project_id: "p1".into(), template: "default".into(), ..Default::default() };
        runner.start_agent(config.clone(), AgentType::Custom(String::new())).await.unwrap();
        assert!(runner.start_agent(config, AgentType::Custom(String::new())).await.is_err());
    }

    #[tokio::test]
    async fn stop_agent_drops_running_record() {
        let runner = AgentRunner::new(runner_parts()).await;
        let config = AgentConfig { agent_id: "a1".into(), project_id: "p1".into(), template: "default".into(), ..Default::default() };
        runner.start_agent(config, AgentType::Custom(String::new())).await.unwrap();
        assert!(runner.is_agent_running("a1").await);
        runner.stop_agent("a1").await.unwrap();
        assert!(!runner.is_agent_running("a1").await);
    }

    #[tokio::test]
    async fn execute_in_unknown_agent_errors() {
        let runner = AgentRunner::new(runner_parts()).await;
        assert!(runner.execute_in_agent("ghost", "echo hi", 5).await.is_err());
    }
}
