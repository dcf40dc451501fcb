//! The tool surface external agents drive: task claiming, file locks,
//! access requests, usage/budget reporting, health, and the onboarding
//! resource. Every operation here is stateless — all authority lives in
//! [`crate::store::StateStore`].

mod bundle;
pub mod server;

pub use bundle::{build_context_bundle, render_markdown, ContextBundle};
pub use server::{build_router, CoordinationServer};
