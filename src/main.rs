use agent_conductor_core::agent_runner::AgentRunner;
use agent_conductor_core::config::Config;
use agent_conductor_core::coordination::{build_router, CoordinationServer};
use agent_conductor_core::health::HealthMonitor;
use agent_conductor_core::sandbox::{ProcessBackend, SandboxManager};
use agent_conductor_core::security::ensure_api_key_exists;
use agent_conductor_core::store::StateStore;
use agent_conductor_core::Result;
use std::sync::Arc;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("starting agent-conductor-core");

    let mut config = Config::load()?;
    if config.api.api_key.is_none() {
        config.api.api_key = Some(ensure_api_key_exists(None)?);
    }

    let store = StateStore::connect(&config.database.path).await?;

    let sandboxes = SandboxManager::new(
        Arc::new(ProcessBackend::new()),
        config.sandbox.max_concurrent,
        config.sandbox.auto_cleanup,
    );
    let _runner = AgentRunner::new(sandboxes).await;

    let server = CoordinationServer::new(store.clone(), &config);
    let app = build_router(server, &config.api, config.health);

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("coordination tool surface listening on {}", addr);

    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()) => {
            if let Err(e) = result {
                tracing::error!("server failed: {}", e);
            }
        }
        _ = run_health_monitors(&store, &config) => {}
    }

    Ok(())
}

/// Starts a [`HealthMonitor`] per project in the configured organization
/// and waits forever; monitors keep running in the background via their
/// own spawned tasks.
async fn run_health_monitors(store: &StateStore, config: &Config) -> Result<()> {
    let organization_id = std::env::var("CONDUCTOR_ORGANIZATION_ID").unwrap_or_else(|_| "default".to_string());
    let projects = store.list_projects(&organization_id).await?;
    for project in projects {
        let monitor = HealthMonitor::new(store.clone(), project.id.clone(), config.health, config.coordination.webhook_url.clone());
        monitor.start().await;
    }
    std::future::pending::<()>().await;
    Ok(())
}
