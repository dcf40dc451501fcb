//! API key generation and file-backed persistence, used by the `conductor
//! init` command when `CONDUCTOR_API_KEY` is not set in the environment.

use crate::{CoreError, Result};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::fs;
use std::path::Path;
use tracing::info;

pub const API_KEY_LENGTH: usize = 64;
pub const API_KEY_FILE: &str = ".conductor-api-key";

pub fn generate_secure_api_key() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect()
}

pub fn save_api_key_to_file(api_key: &str) -> Result<()> {
    fs::write(API_KEY_FILE, api_key)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(API_KEY_FILE)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(API_KEY_FILE, perms)?;
    }

    info!("saved API key to {}", API_KEY_FILE);
    Ok(())
}

pub fn load_api_key_from_file() -> Result<Option<String>> {
    if !Path::new(API_KEY_FILE).exists() {
        return Ok(None);
    }
    let key = fs::read_to_string(API_KEY_FILE)?.trim().to_string();
    if key.len() != API_KEY_LENGTH || !key.chars().all(|c| c.is_alphanumeric()) {
        return Err(CoreError::Configuration("malformed API key file".into()));
    }
    Ok(Some(key))
}

/// Used by `conductor init`: prefers an existing env-configured key, falls
/// back to a previously generated file, otherwise mints and persists one.
pub fn ensure_api_key_exists(existing: Option<&str>) -> Result<String> {
    if let Some(key) = existing {
        if !key.trim().is_empty() {
            return Ok(key.to_string());
        }
    }
    if let Some(key) = load_api_key_from_file()? {
        return Ok(key);
    }
    let key = generate_secure_api_key();
    save_api_key_to_file(&key)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_expected_length_and_charset() {
        let key = generate_secure_api_key();
        assert_eq!(key.len(), API_KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_alphanumeric()));
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(generate_secure_api_key(), generate_secure_api_key());
    }
}
