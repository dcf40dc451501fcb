//! Periodic per-agent heartbeat classification, plumbed the way the
//! teacher's system monitor runs its background scan loop: a spawned
//! task driven by an interval, torn down via a shutdown channel.

use crate::config::HealthThresholds;
use crate::models::AgentStatus;
use crate::store::StateStore;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Healthy,
    Warning,
    Critical,
    Offline,
}

/// Classifies elapsed seconds since last heartbeat (`None` = never heard
/// from) against the configured thresholds.
pub fn classify(elapsed_secs: Option<i64>, thresholds: &HealthThresholds) -> Classification {
    let Some(elapsed) = elapsed_secs else {
        return Classification::Offline;
    };
    if elapsed >= thresholds.offline_secs {
        Classification::Offline
    } else if elapsed >= thresholds.critical_secs {
        Classification::Critical
    } else if elapsed >= thresholds.warning_secs {
        Classification::Warning
    } else {
        Classification::Healthy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthTransition {
    pub agent_id: String,
    pub previous_status: Option<Classification>,
    pub current_status: Classification,
    pub seconds_since_heartbeat: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub status: Classification,
    pub seconds_since_heartbeat: Option<i64>,
}

/// Classifies every agent in a project against the current wall clock.
/// This is the pure, on-demand variant the `health_status` tool calls;
/// `HealthMonitor` wraps it in a periodic scan loop with transition
/// tracking.
pub async fn classify_project(
    store: &StateStore,
    project_id: &str,
    thresholds: &HealthThresholds,
) -> Result<Vec<AgentHealth>> {
    let agents = store.list_agents(project_id).await?;
    Ok(agents
        .iter()
        .map(|agent| {
            let elapsed = agent
                .last_heartbeat
                .map(|hb| (Utc::now() - hb).num_seconds());
            AgentHealth {
                agent_id: agent.id.clone(),
                status: classify(elapsed, thresholds),
                seconds_since_heartbeat: elapsed,
            }
        })
        .collect())
}

type TransitionHandler = Arc<dyn Fn(HealthTransition) + Send + Sync>;

/// Periodically classifies every agent in a project, emitting transition
/// events and persisting offline classifications back to the store.
pub struct HealthMonitor {
    store: StateStore,
    project_id: String,
    thresholds: HealthThresholds,
    webhook_url: Option<String>,
    http: reqwest::Client,
    previous: Arc<RwLock<HashMap<String, Classification>>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: Arc<Mutex<Option<mpsc::Sender<()>>>>,
    on_transition: Arc<RwLock<Option<TransitionHandler>>>,
}

impl HealthMonitor {
    pub fn new(
        store: StateStore,
        project_id: String,
        thresholds: HealthThresholds,
        webhook_url: Option<String>,
    ) -> Self {
        Self {
            store,
            project_id,
            thresholds,
            webhook_url,
            http: reqwest::Client::new(),
            previous: Arc::new(RwLock::new(HashMap::new())),
            handle: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(Mutex::new(None)),
            on_transition: Arc::new(RwLock::new(None)),
        }
    }

    /// Registers the single subscriber callback for transition events.
    /// Subscriber panics are not caught here (Rust closures don't throw);
    /// callers should not let their callback panic.
    pub async fn on_transition(&self, handler: impl Fn(HealthTransition) + Send + Sync + 'static) {
        *self.on_transition.write().await = Some(Arc::new(handler));
    }

    /// Runs an immediate scan, then schedules periodic scans. A no-op if
    /// already running.
    pub async fn start(&self) {
        if self.handle.lock().await.is_some() {
            return;
        }

        if let Err(e) = self.scan_once().await {
            error!("initial health scan failed: {}", e);
        }

        let (tx, mut rx) = mpsc::channel::<()>(1);
        *self.shutdown.lock().await = Some(tx);

        let monitor = self.clone_for_scan();
        let interval_ms = self.thresholds.scan_interval_ms;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            interval.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = monitor.scan_once().await {
                            error!("health scan failed: {}", e);
                        }
                    }
                    _ = rx.recv() => break,
                }
            }
        });

        *self.handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    fn clone_for_scan(&self) -> Self {
        Self {
            store: self.store.clone(),
            project_id: self.project_id.clone(),
            thresholds: self.thresholds,
            webhook_url: self.webhook_url.clone(),
            http: self.http.clone(),
            previous: Arc::clone(&self.previous),
            handle: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(Mutex::new(None)),
            on_transition: Arc::clone(&self.on_transition),
        }
    }

    async fn scan_once(&self) -> Result<()> {
        let classifications = classify_project(&self.store, &self.project_id, &self.thresholds).await?;
        let mut previous = self.previous.write().await;

        for agent in classifications {
            let prior = previous.get(&agent.agent_id).copied();
            if prior == Some(agent.status) {
                continue;
            }
            previous.insert(agent.agent_id.clone(), agent.status);

            let transition = HealthTransition {
                agent_id: agent.agent_id.clone(),
                previous_status: prior,
                current_status: agent.status,
                seconds_since_heartbeat: agent.seconds_since_heartbeat,
            };

            if agent.status == Classification::Offline {
                if let Err(e) = self
                    .store
                    .update_agent_status(&self.project_id, &agent.agent_id, AgentStatus::Offline)
                    .await
                {
                    warn!("failed to persist offline status for {}: {}", agent.agent_id, e);
                }
            }

            if matches!(agent.status, Classification::Critical | Classification::Offline) {
                self.notify_webhook(&transition).await;
            }

            if let Some(handler) = self.on_transition.read().await.as_ref() {
                handler(transition);
            }
        }

        Ok(())
    }

    async fn notify_webhook(&self, transition: &HealthTransition) {
        let Some(url) = &self.webhook_url else { return };
        let payload = serde_json::json!({
            "type": "agent_health_alert",
            "agentId": transition.agent_id,
            "status": transition.current_status,
            "secondsSinceHeartbeat": transition.seconds_since_heartbeat,
        });
        if let Err(e) = self.http.post(url).json(&payload).send().await {
            warn!("health webhook delivery failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> HealthThresholds {
        HealthThresholds {
            warning_secs: 120,
            critical_secs: 300,
            offline_secs: 600,
            scan_interval_ms: 30_000,
        }
    }

    #[test]
    fn classify_boundaries() {
        let t = thresholds();
        assert_eq!(classify(Some(0), &t), Classification::Healthy);
        assert_eq!(classify(Some(119), &t), Classification::Healthy);
        assert_eq!(classify(Some(120), &t), Classification::Warning);
        assert_eq!(classify(Some(299), &t), Classification::Warning);
        assert_eq!(classify(Some(300), &t), Classification::Critical);
        assert_eq!(classify(Some(599), &t), Classification::Critical);
        assert_eq!(classify(Some(600), &t), Classification::Offline);
        assert_eq!(classify(None, &t), Classification::Offline);
    }

    #[tokio::test]
    async fn scan_emits_transition_only_on_change() {
        use crate::models::{Agent, Project};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = StateStore::connect_in_memory().await.unwrap();
        let project = Project::new("org".into(), "p".into(), "p".into());
        store.create_project(&project).await.unwrap();
        let agent = Agent::new(
            project.id.clone(),
            "a1".into(),
            "Agent".into(),
            "anthropic".into(),
            "claude-code".into(),
        );
        store.register_agent(&agent).await.unwrap();

        let monitor = HealthMonitor::new(store.clone(), project.id.clone(), thresholds(), None);
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        monitor
            .on_transition(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        monitor.scan_once().await.unwrap();
        monitor.scan_once().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
