use super::*;
use serial_test::serial;
use std::env;

fn cleanup_test_env() {
    env::remove_var("CONDUCTOR_API_KEY");
    env::remove_var("CONDUCTOR_HOST");
    env::remove_var("CONDUCTOR_PORT");
    env::remove_var("CONDUCTOR_ALLOWED_ORIGINS");
    env::remove_var("CONDUCTOR_DB_PATH");
    env::remove_var("CONDUCTOR_CONFLICT_STRATEGY");
    env::remove_var("CONDUCTOR_CHECKPOINT_EVERY_N_TASKS");
}

#[test]
#[serial]
fn config_loads_without_api_key_but_warns() {
    cleanup_test_env();
    let result = Config::load();
    assert!(result.is_ok());
    assert!(result.unwrap().api.api_key.is_none());
}

#[test]
#[serial]
fn config_rejects_short_api_key() {
    cleanup_test_env();
    env::set_var("CONDUCTOR_API_KEY", "too-short");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn config_rejects_blank_api_key() {
    cleanup_test_env();
    env::set_var("CONDUCTOR_API_KEY", "");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn config_default_values() {
    cleanup_test_env();
    env::set_var(
        "CONDUCTOR_API_KEY",
        "secure-api-key-1234567890123456789012345678",
    );
    let config = Config::load().unwrap();
    assert_eq!(config.api.host, "127.0.0.1");
    assert_eq!(config.api.port, 4500);
    assert_eq!(config.database.path, "conductor.db");
    assert_eq!(
        config.coordination.checkpoint_every_n_tasks,
        crate::constants::DEFAULT_CHECKPOINT_EVERY_N_TASKS
    );
    assert_eq!(
        config.coordination.default_conflict_strategy,
        crate::models::ConflictStrategy::Lock
    );
    cleanup_test_env();
}

#[test]
#[serial]
fn config_parses_allowed_origins() {
    cleanup_test_env();
    env::set_var(
        "CONDUCTOR_API_KEY",
        "secure-api-key-1234567890123456789012345678",
    );
    env::set_var(
        "CONDUCTOR_ALLOWED_ORIGINS",
        "https://example.com,https://app.example.com",
    );
    let config = Config::load().unwrap();
    assert_eq!(config.api.allowed_origins.len(), 2);
    cleanup_test_env();
}

#[test]
#[serial]
fn config_parses_conflict_strategy_override() {
    cleanup_test_env();
    env::set_var(
        "CONDUCTOR_API_KEY",
        "secure-api-key-1234567890123456789012345678",
    );
    env::set_var("CONDUCTOR_CONFLICT_STRATEGY", "zone");
    let config = Config::load().unwrap();
    assert_eq!(
        config.coordination.default_conflict_strategy,
        crate::models::ConflictStrategy::Zone
    );
    cleanup_test_env();
}
