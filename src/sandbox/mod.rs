//! Bounded set of remote execution sandboxes. The concrete backend that
//! provisions and runs commands in a sandbox is pluggable behind
//! [`SandboxBackend`]; everything here depends on the trait, never on a
//! concrete process implementation.

mod backend;

pub use backend::ProcessBackend;

use crate::{CoreError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Running,
    Stopped,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxInstance {
    pub id: String,
    pub agent_id: String,
    pub project_id: String,
    pub template: String,
    pub status: SandboxStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxEventKind {
    Created,
    Started,
    Stopped,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxEvent {
    pub kind: SandboxEventKind,
    pub sandbox_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<String>,
    pub timeout_secs: u64,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Streaming callbacks threaded through [`SandboxManager::execute_command_streaming`].
/// Any that are `None` are simply skipped; a panicking callback is caught
/// and logged, never allowed to corrupt sandbox bookkeeping.
#[derive(Default)]
pub struct StreamCallbacks {
    pub on_start: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_output: Option<Box<dyn Fn(OutputStream, &[u8]) + Send + Sync>>,
    pub on_complete: Option<Box<dyn Fn(i32, u64) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpKind {
    Read,
    Write,
    Delete,
    List,
    Exists,
}

#[derive(Debug, Clone)]
pub struct FileOperation {
    pub kind: FileOpKind,
    pub path: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileOpResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The underlying sandbox provider. `SandboxManager` depends only on this
/// trait, never on a concrete process or remote-service implementation.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn provision(&self, sandbox_id: &str) -> Result<()>;
    async fn execute(&self, sandbox_id: &str, cmd: &str, opts: &ExecOptions) -> Result<ExecOutput>;
    async fn execute_streaming(
        &self,
        sandbox_id: &str,
        cmd: &str,
        opts: &ExecOptions,
        callbacks: &StreamCallbacks,
    ) -> Result<ExecOutput>;
    async fn file_operation(&self, sandbox_id: &str, op: &FileOperation) -> FileOpResult;
    async fn teardown(&self, sandbox_id: &str) -> Result<()>;
}

type EventHandler = Arc<dyn Fn(SandboxEvent) + Send + Sync>;

/// Owns the bounded pool of sandboxes for one conductor process. Policy
/// (concurrency limit, absolute deadlines, lifecycle events, cleanup)
/// lives here; the actual work of running a command happens behind
/// [`SandboxBackend`].
#[derive(Clone)]
pub struct SandboxManager {
    backend: Arc<dyn SandboxBackend>,
    max_concurrent: usize,
    auto_cleanup: bool,
    sandboxes: Arc<RwLock<HashMap<String, SandboxInstance>>>,
    on_event: Arc<RwLock<Option<EventHandler>>>,
}

impl SandboxManager {
    pub fn new(backend: Arc<dyn SandboxBackend>, max_concurrent: usize, auto_cleanup: bool) -> Self {
        Self {
            backend,
            max_concurrent,
            auto_cleanup,
            sandboxes: Arc::new(RwLock::new(HashMap::new())),
            on_event: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn on_event(&self, handler: impl Fn(SandboxEvent) + Send + Sync + 'static) {
        *self.on_event.write().await = Some(Arc::new(handler));
    }

    async fn emit(&self, kind: SandboxEventKind, sandbox_id: &str, agent_id: &str) {
        let Some(handler) = self.on_event.read().await.clone() else {
            return;
        };
        let event = SandboxEvent {
            kind,
            sandbox_id: sandbox_id.to_string(),
            agent_id: agent_id.to_string(),
        };
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
        if result.is_err() {
            error!("sandbox event subscriber panicked");
        }
    }

    pub async fn running_count(&self) -> usize {
        self.sandboxes
            .read()
            .await
            .values()
            .filter(|s| s.status == SandboxStatus::Running)
            .count()
    }

    /// Fails fast with [`CoreError::Sandbox`] once the running count
    /// equals `max_concurrent`. `deadline_secs == 0` means no timer.
    pub async fn create_sandbox(
        &self,
        agent_id: &str,
        project_id: &str,
        template: &str,
        deadline_secs: u64,
    ) -> Result<String> {
        if self.running_count().await >= self.max_concurrent {
            return Err(CoreError::Sandbox(format!(
                "max concurrent sandboxes ({}) reached",
                self.max_concurrent
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.backend.provision(&id).await?;

        let now = Utc::now();
        let instance = SandboxInstance {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            project_id: project_id.to_string(),
            template: template.to_string(),
            status: SandboxStatus::Running,
            started_at: now,
            last_activity_at: now,
        };
        self.sandboxes.write().await.insert(id.clone(), instance);
        self.emit(SandboxEventKind::Created, &id, agent_id).await;
        self.emit(SandboxEventKind::Started, &id, agent_id).await;

        if deadline_secs > 0 {
            let manager = self.clone();
            let sandbox_id = id.clone();
            let agent_id = agent_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(deadline_secs)).await;
                manager.expire(&sandbox_id, &agent_id).await;
            });
        }

        Ok(id)
    }

    async fn expire(&self, sandbox_id: &str, agent_id: &str) {
        let mut sandboxes = self.sandboxes.write().await;
        let Some(instance) = sandboxes.get_mut(sandbox_id) else {
            return;
        };
        if instance.status != SandboxStatus::Running {
            return;
        }
        instance.status = SandboxStatus::Timeout;
        drop(sandboxes);
        self.emit(SandboxEventKind::Timeout, sandbox_id, agent_id).await;
    }

    async fn touch(&self, sandbox_id: &str) {
        if let Some(instance) = self.sandboxes.write().await.get_mut(sandbox_id) {
            instance.last_activity_at = Utc::now();
        }
    }

    async fn agent_of(&self, sandbox_id: &str) -> Result<String> {
        self.sandboxes
            .read()
            .await
            .get(sandbox_id)
            .map(|s| s.agent_id.clone())
            .ok_or_else(|| CoreError::not_found(format!("sandbox {sandbox_id}")))
    }

    pub async fn execute_command(&self, sandbox_id: &str, cmd: &str, opts: ExecOptions) -> Result<ExecOutput> {
        let output = self.backend.execute(sandbox_id, cmd, &opts).await;
        self.touch(sandbox_id).await;
        output
    }

    pub async fn execute_command_streaming(
        &self,
        sandbox_id: &str,
        cmd: &str,
        opts: ExecOptions,
        callbacks: StreamCallbacks,
    ) -> Result<ExecOutput> {
        if let Some(on_start) = &callbacks.on_start {
            on_start();
        }
        let result = self.backend.execute_streaming(sandbox_id, cmd, &opts, &callbacks).await;
        self.touch(sandbox_id).await;
        if let Err(e) = &result {
            if let Some(on_error) = &callbacks.on_error {
                on_error(&e.to_string());
            }
        }
        result
    }

    /// `write` with missing content defaults to empty; `exists` is a
    /// best-effort read — an error is reported as `exists:false`, never
    /// raised.
    pub async fn file_operation(&self, sandbox_id: &str, path: &str, op: FileOpKind, content: Option<String>) -> FileOpResult {
        if let Err(e) = crate::validation::validate_sandbox_path(path) {
            return FileOpResult {
                success: false,
                error: Some(e.to_string()),
                ..Default::default()
            };
        }
        let content = match op {
            FileOpKind::Write => Some(content.unwrap_or_default()),
            _ => content,
        };
        self.backend
            .file_operation(sandbox_id, &FileOperation { kind: op, path: path.to_string(), content })
            .await
    }

    /// Marks a sandbox stopped and tears it down via the backend. Distinct
    /// from timeout expiry, which never attempts a kill.
    pub async fn stop_sandbox(&self, sandbox_id: &str) -> Result<()> {
        let agent_id = self.agent_of(sandbox_id).await?;
        if let Err(e) = self.backend.teardown(sandbox_id).await {
            warn!("sandbox teardown failed for {}: {}", sandbox_id, e);
        }
        if let Some(instance) = self.sandboxes.write().await.get_mut(sandbox_id) {
            instance.status = SandboxStatus::Stopped;
        }
        self.emit(SandboxEventKind::Stopped, sandbox_id, &agent_id).await;
        if self.auto_cleanup {
            self.cleanup().await;
        }
        Ok(())
    }

    pub async fn fail_sandbox(&self, sandbox_id: &str, reason: &str) -> Result<()> {
        let agent_id = self.agent_of(sandbox_id).await?;
        warn!("sandbox {} failed: {}", sandbox_id, reason);
        if let Some(instance) = self.sandboxes.write().await.get_mut(sandbox_id) {
            instance.status = SandboxStatus::Failed;
        }
        self.emit(SandboxEventKind::Failed, sandbox_id, &agent_id).await;
        if self.auto_cleanup {
            self.cleanup().await;
        }
        Ok(())
    }

    pub async fn get(&self, sandbox_id: &str) -> Option<SandboxInstance> {
        self.sandboxes.read().await.get(sandbox_id).cloned()
    }

    /// Removes in-memory records for sandboxes whose status is not
    /// `running`. Returns the number removed.
    pub async fn cleanup(&self) -> usize {
        let mut sandboxes = self.sandboxes.write().await;
        let before = sandboxes.len();
        sandboxes.retain(|_, s| s.status == SandboxStatus::Running);
        before - sandboxes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(max_concurrent: usize) -> SandboxManager {
        SandboxManager::new(Arc::new(ProcessBackend::new()), max_concurrent, true)
    }

    #[tokio::test]
    async fn create_sandbox_fails_fast_at_limit() {
        let manager = manager(1);
        let first = manager.create_sandbox("a1", "p1", "default", 0).await.unwrap();
        assert!(manager.create_sandbox("a2", "p1", "default", 0).await.is_err());
        manager.stop_sandbox(&first).await.unwrap();
        assert!(manager.create_sandbox("a2", "p1", "default", 0).await.is_ok());
    }

    #[tokio::test]
    async fn zero_deadline_never_times_out() {
        let manager = manager(4);
        let id = manager.create_sandbox("a1", "p1", "default", 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(manager.get(&id).await.unwrap().status, SandboxStatus::Running);
    }

    #[tokio::test]
    async fn deadline_expiry_emits_timeout_without_killing() {
        let manager = manager(4);
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        manager
            .on_event(move |e| {
                if e.kind == SandboxEventKind::Timeout {
                    count_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        let id = manager.create_sandbox("a1", "p1", "default", 0).await.unwrap();
        manager.expire(&id, "a1").await;
        assert_eq!(manager.get(&id).await.unwrap().status, SandboxStatus::Timeout);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_keeps_only_running() {
        let manager = manager(4);
        let running = manager.create_sandbox("a1", "p1", "default", 0).await.unwrap();
        let stopped = manager.create_sandbox("a2", "p1", "default", 0).await.unwrap();
        manager.stop_sandbox(&stopped).await.unwrap();
        assert!(manager.get(&running).await.is_some());
        assert!(manager.get(&stopped).await.is_none());
    }

    #[tokio::test]
    async fn file_operation_rejects_unsafe_path() {
        let manager = manager(4);
        let id = manager.create_sandbox("a1", "p1", "default", 0).await.unwrap();
        let result = manager.file_operation(&id, "../etc/passwd", FileOpKind::Read, None).await;
        assert!(!result.success);
    }
}
