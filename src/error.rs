use thiserror::Error;

/// Convenience alias for `Result<T, CoreError>`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Crate-wide error type for the conductor core.
///
/// Variants map onto the error taxonomy the coordination tool surface
/// renders to agents: `NotFound`, `Conflict`, transient I/O, `Timeout`,
/// and `Validation` each carry enough context for a caller to decide
/// what to do next.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// True for errors that represent infrastructure hiccups rather than
    /// precondition failures — logged, never retried automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Http(_) | CoreError::Io(_))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        CoreError::Conflict(what.into())
    }
}
