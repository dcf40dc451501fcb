//! # Agent Conductor Core
//!
//! A multi-agent coding orchestration core: a durable task store, the
//! coordination tool surface agents drive, a sandboxed agent runner, and
//! a health monitor, composed around one durable source of truth.
//!
//! ## Architecture
//!
//! - [`store`] — the transactional [`store::StateStore`], conflict
//!   detection, and zone ownership.
//! - [`coordination`] — the agent-facing tool surface and its `axum`
//!   transport.
//! - [`sandbox`] — bounded, policy-enforcing sandbox provisioning.
//! - [`agent_runner`] — per-agent-type install/run recipes on top of
//!   `sandbox`.
//! - [`health`] — periodic heartbeat classification and offline
//!   auto-marking.

/// Agent lifecycle on top of sandbox provisioning.
pub mod agent_runner;
/// Bearer-token authentication middleware for the tool surface.
pub mod auth;
/// System configuration, loaded fail-fast from the environment.
pub mod config;
/// System-wide default values.
pub mod constants;
/// The agent-facing coordination tool surface.
pub mod coordination;
/// Error types and handling.
pub mod error;
/// Periodic heartbeat classification and offline auto-marking.
pub mod health;
/// Core data models.
pub mod models;
/// Per-IP request throttling.
pub mod rate_limit;
/// Bounded, policy-enforcing sandbox provisioning.
pub mod sandbox;
/// API key generation and file-backed persistence.
pub mod security;
/// Durable, transactional state repository.
pub mod store;
/// Input validation and sanitization.
pub mod validation;

pub use error::{CoreError, Result};
