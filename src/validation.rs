//! Input validation for sandbox file paths — the boundary where
//! agent-supplied paths enter the filesystem.

use crate::{CoreError, Result};

/// Rejects paths a sandboxed file operation must never touch: absolute
/// paths, `..` segments, and a null byte.
pub fn validate_sandbox_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(CoreError::Validation("path cannot be empty".into()));
    }
    if path.contains('\0') {
        return Err(CoreError::Validation("path contains a null byte".into()));
    }
    if std::path::Path::new(path).is_absolute() {
        return Err(CoreError::Validation(format!("path must be relative: {path}")));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(CoreError::Validation(format!("path escapes the workspace: {path}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_path_rejects_traversal_and_absolute() {
        assert!(validate_sandbox_path("../secrets").is_err());
        assert!(validate_sandbox_path("/etc/passwd").is_err());
        assert!(validate_sandbox_path("src/main.rs").is_ok());
    }

    #[test]
    fn sandbox_path_rejects_empty_and_null_byte() {
        assert!(validate_sandbox_path("").is_err());
        assert!(validate_sandbox_path("a\0b").is_err());
    }
}
