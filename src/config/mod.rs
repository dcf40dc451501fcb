use crate::models::ConflictStrategy;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub coordination: CoordinationConfig,
    pub sandbox: SandboxConfig,
    pub health: HealthThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
}

/// Options that govern how the coordination tool surface behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    pub default_conflict_strategy: ConflictStrategy,
    pub checkpoint_every_n_tasks: u32,
    pub auto_refresh_context: bool,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub max_concurrent: usize,
    pub default_timeout_secs: u64,
    pub auto_cleanup: bool,
}

/// Health monitor classification thresholds, in seconds since heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub warning_secs: i64,
    pub critical_secs: i64,
    pub offline_secs: i64,
    pub scan_interval_ms: u64,
}

impl Config {
    /// Loads configuration from the environment (optionally via a `.env`
    /// file), failing fast on values that are missing or malformed rather
    /// than silently defaulting anything security-relevant.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("loaded .env file from {:?}", path),
            Err(e) => tracing::debug!("no .env file loaded: {}", e),
        }

        let api_key = env::var("CONDUCTOR_API_KEY").ok();
        match &api_key {
            Some(key) if key.trim().is_empty() => {
                return Err(CoreError::Configuration(
                    "CONDUCTOR_API_KEY cannot be blank".to_string(),
                ));
            }
            Some(key) if key.len() < 32 => {
                return Err(CoreError::Configuration(
                    "CONDUCTOR_API_KEY must be at least 32 characters".to_string(),
                ));
            }
            None => {
                tracing::warn!(
                    "CONDUCTOR_API_KEY not set — the tool surface will reject all requests"
                );
            }
            Some(_) => {}
        }

        let allowed_origins = env::var("CONDUCTOR_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env::var("CONDUCTOR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("CONDUCTOR_PORT", 4500)?,
            api_key,
            allowed_origins,
        };

        let database = DatabaseConfig {
            path: env::var("CONDUCTOR_DB_PATH").unwrap_or_else(|_| "conductor.db".to_string()),
        };

        let default_conflict_strategy = env::var("CONDUCTOR_CONFLICT_STRATEGY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(ConflictStrategy::Lock);

        let coordination = CoordinationConfig {
            default_conflict_strategy,
            checkpoint_every_n_tasks: env_parse(
                "CONDUCTOR_CHECKPOINT_EVERY_N_TASKS",
                crate::constants::DEFAULT_CHECKPOINT_EVERY_N_TASKS,
            )?,
            auto_refresh_context: env_parse("CONDUCTOR_AUTO_REFRESH_CONTEXT", true)?,
            webhook_url: env::var("CONDUCTOR_WEBHOOK_URL").ok(),
        };

        let sandbox = SandboxConfig {
            max_concurrent: env_parse(
                "CONDUCTOR_SANDBOX_MAX_CONCURRENT",
                crate::constants::DEFAULT_SANDBOX_MAX_CONCURRENT,
            )?,
            default_timeout_secs: env_parse(
                "CONDUCTOR_SANDBOX_TIMEOUT_SECS",
                crate::constants::DEFAULT_SANDBOX_TIMEOUT_SECS,
            )?,
            auto_cleanup: env_parse("CONDUCTOR_SANDBOX_AUTO_CLEANUP", true)?,
        };

        let health = HealthThresholds {
            warning_secs: env_parse(
                "CONDUCTOR_HEALTH_WARNING_SECS",
                crate::constants::DEFAULT_HEALTH_WARNING_SECS,
            )?,
            critical_secs: env_parse(
                "CONDUCTOR_HEALTH_CRITICAL_SECS",
                crate::constants::DEFAULT_HEALTH_CRITICAL_SECS,
            )?,
            offline_secs: env_parse(
                "CONDUCTOR_HEALTH_OFFLINE_SECS",
                crate::constants::DEFAULT_HEALTH_OFFLINE_SECS,
            )?,
            scan_interval_ms: env_parse(
                "CONDUCTOR_HEALTH_SCAN_INTERVAL_MS",
                crate::constants::DEFAULT_SCAN_INTERVAL_MS,
            )?,
        };

        Ok(Config {
            database,
            api,
            coordination,
            sandbox,
            health,
        })
    }
}

#[cfg(test)]
mod tests;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CoreError::Configuration(format!("{key} is not a valid value"))),
        Err(_) => Ok(default),
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            warning_secs: crate::constants::DEFAULT_HEALTH_WARNING_SECS,
            critical_secs: crate::constants::DEFAULT_HEALTH_CRITICAL_SECS,
            offline_secs: crate::constants::DEFAULT_HEALTH_OFFLINE_SECS,
            scan_interval_ms: crate::constants::DEFAULT_SCAN_INTERVAL_MS,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_concurrent: crate::constants::DEFAULT_SANDBOX_MAX_CONCURRENT,
            default_timeout_secs: crate::constants::DEFAULT_SANDBOX_TIMEOUT_SECS,
            auto_cleanup: true,
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            default_conflict_strategy: ConflictStrategy::Lock,
            checkpoint_every_n_tasks: crate::constants::DEFAULT_CHECKPOINT_EVERY_N_TASKS,
            auto_refresh_context: true,
            webhook_url: None,
        }
    }
}
