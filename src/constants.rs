//! System-wide default values. Most are overridable per project via
//! `Project.settings` or per call via explicit tool arguments; these are
//! the fallbacks used when a caller doesn't specify one.

/// Default TTL applied when a lock request omits one, in seconds.
pub const DEFAULT_LOCK_TTL_SECS: i64 = 300;

/// Default onboarding cadence: emit a "Checkpoint" marker every N claims.
pub const DEFAULT_CHECKPOINT_EVERY_N_TASKS: u32 = 3;

/// Window used by `isFileSafeToModify` to decide whether a recent git
/// modification by another agent makes a path unsafe to touch.
pub const DEFAULT_SAFE_MODIFY_WINDOW_MINUTES: i64 = 5;

/// Age after which a still-pending access request is auto-expired.
pub const DEFAULT_ACCESS_REQUEST_EXPIRY_HOURS: i64 = 24;

/// Health monitor thresholds, in seconds since last heartbeat.
pub const DEFAULT_HEALTH_WARNING_SECS: i64 = 120;
pub const DEFAULT_HEALTH_CRITICAL_SECS: i64 = 300;
pub const DEFAULT_HEALTH_OFFLINE_SECS: i64 = 600;

/// Health monitor scan cadence.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 30_000;

/// Sandbox defaults.
pub const DEFAULT_SANDBOX_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 3600;

/// `git clone` is given this long before AgentRunner gives up and tears
/// down the sandbox.
pub const GIT_CLONE_TIMEOUT_SECS: u64 = 120;
