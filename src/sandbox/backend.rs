//! Supervised-OS-process sandbox backend, suitable for local development
//! and tests. Each sandbox is a directory under the system temp root;
//! commands run as child processes with `current_dir` pinned to it, the
//! same `tokio::process::Command` + piped-stdio pattern the CLI client
//! uses to drive an external agent binary.

use super::{ExecOptions, ExecOutput, FileOpKind, FileOpResult, FileOperation, SandboxBackend, StreamCallbacks};
use crate::{CoreError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::warn;

pub struct ProcessBackend {
    root: PathBuf,
}

impl ProcessBackend {
    pub fn new() -> Self {
        Self { root: std::env::temp_dir().join("conductor-sandboxes") }
    }

    fn workdir(&self, sandbox_id: &str) -> PathBuf {
        self.root.join(sandbox_id)
    }
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxBackend for ProcessBackend {
    async fn provision(&self, sandbox_id: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.workdir(sandbox_id)).await?;
        Ok(())
    }

    async fn execute(&self, sandbox_id: &str, cmd: &str, opts: &ExecOptions) -> Result<ExecOutput> {
        let mut workdir = self.workdir(sandbox_id);
        if let Some(cwd) = &opts.cwd {
            workdir = workdir.join(cwd);
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .current_dir(&workdir)
            .envs(&opts.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let child = command.spawn().map_err(|e| CoreError::Sandbox(format!("failed to spawn: {e}")))?;

        let timeout = std::time::Duration::from_secs(opts.timeout_secs.max(1));
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| CoreError::Timeout(format!("command timed out after {}s", opts.timeout_secs)))?
            .map_err(|e| CoreError::Sandbox(format!("command execution failed: {e}")))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn execute_streaming(
        &self,
        sandbox_id: &str,
        cmd: &str,
        opts: &ExecOptions,
        callbacks: &StreamCallbacks,
    ) -> Result<ExecOutput> {
        let mut workdir = self.workdir(sandbox_id);
        if let Some(cwd) = &opts.cwd {
            workdir = workdir.join(cwd);
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .current_dir(&workdir)
            .envs(&opts.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| CoreError::Sandbox(format!("failed to spawn: {e}")))?;

        let mut stdout_lines = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
        let mut stderr_buf = Vec::new();
        child
            .stderr
            .take()
            .expect("piped stderr")
            .read_to_end(&mut stderr_buf)
            .await
            .ok();

        let mut stdout_buf = String::new();
        while let Ok(Some(line)) = stdout_lines.next_line().await {
            if let Some(on_output) = &callbacks.on_output {
                on_output(super::OutputStream::Stdout, line.as_bytes());
            }
            stdout_buf.push_str(&line);
            stdout_buf.push('\n');
        }
        if !stderr_buf.is_empty() {
            if let Some(on_output) = &callbacks.on_output {
                on_output(super::OutputStream::Stderr, &stderr_buf);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| CoreError::Sandbox(format!("command execution failed: {e}")))?;
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(on_complete) = &callbacks.on_complete {
            on_complete(exit_code, duration_ms);
        }

        Ok(ExecOutput {
            exit_code,
            stdout: stdout_buf,
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            duration_ms,
        })
    }

    async fn file_operation(&self, sandbox_id: &str, op: &FileOperation) -> FileOpResult {
        let path = self.workdir(sandbox_id).join(&op.path);
        match op.kind {
            FileOpKind::Read => match tokio::fs::read_to_string(&path).await {
                Ok(content) => FileOpResult { success: true, content: Some(content), ..Default::default() },
                Err(e) => FileOpResult { success: false, error: Some(e.to_string()), ..Default::default() },
            },
            FileOpKind::Write => {
                let content = op.content.clone().unwrap_or_default();
                match path.parent() {
                    Some(parent) => {
                        if let Err(e) = tokio::fs::create_dir_all(parent).await {
                            return FileOpResult { success: false, error: Some(e.to_string()), ..Default::default() };
                        }
                    }
                    None => {}
                }
                match tokio::fs::write(&path, content).await {
                    Ok(()) => FileOpResult { success: true, ..Default::default() },
                    Err(e) => FileOpResult { success: false, error: Some(e.to_string()), ..Default::default() },
                }
            }
            FileOpKind::Delete => match tokio::fs::remove_file(&path).await {
                Ok(()) => FileOpResult { success: true, ..Default::default() },
                Err(e) => FileOpResult { success: false, error: Some(e.to_string()), ..Default::default() },
            },
            FileOpKind::List => match tokio::fs::read_dir(&path).await {
                Ok(mut entries) => {
                    let mut names = Vec::new();
                    loop {
                        match entries.next_entry().await {
                            Ok(Some(entry)) => names.push(entry.file_name().to_string_lossy().into_owned()),
                            Ok(None) => break,
                            Err(e) => return FileOpResult { success: false, error: Some(e.to_string()), ..Default::default() },
                        }
                    }
                    FileOpResult { success: true, entries: Some(names), ..Default::default() }
                }
                Err(e) => FileOpResult { success: false, error: Some(e.to_string()), ..Default::default() },
            },
            FileOpKind::Exists => match tokio::fs::read_to_string(&path).await {
                Ok(_) => FileOpResult { success: true, exists: Some(true), ..Default::default() },
                Err(_) => FileOpResult { success: true, exists: Some(false), ..Default::default() },
            },
        }
    }

    async fn teardown(&self, sandbox_id: &str) -> Result<()> {
        let path = self.workdir(sandbox_id);
        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("failed to remove sandbox workdir {:?}: {}", path, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let backend = ProcessBackend::new();
        let id = uuid::Uuid::new_v4().to_string();
        backend.provision(&id).await.unwrap();

        let write = backend
            .file_operation(&id, &FileOperation { kind: FileOpKind::Write, path: "notes.txt".into(), content: Some("hi".into()) })
            .await;
        assert!(write.success);

        let read = backend
            .file_operation(&id, &FileOperation { kind: FileOpKind::Read, path: "notes.txt".into(), content: None })
            .await;
        assert_eq!(read.content.as_deref(), Some("hi"));

        backend.teardown(&id).await.unwrap();
    }

    #[tokio::test]
    async fn exists_is_best_effort_false_on_missing() {
        let backend = ProcessBackend::new();
        let id = uuid::Uuid::new_v4().to_string();
        backend.provision(&id).await.unwrap();

        let exists = backend
            .file_operation(&id, &FileOperation { kind: FileOpKind::Exists, path: "missing.txt".into(), content: None })
            .await;
        assert!(exists.success);
        assert_eq!(exists.exists, Some(false));
        backend.teardown(&id).await.unwrap();
    }

    #[tokio::test]
    async fn execute_runs_shell_command() {
        let backend = ProcessBackend::new();
        let id = uuid::Uuid::new_v4().to_string();
        backend.provision(&id).await.unwrap();

        let output = backend.execute(&id, "echo hello", &ExecOptions { timeout_secs: 5, ..Default::default() }).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "hello");

        backend.teardown(&id).await.unwrap();
    }
}
