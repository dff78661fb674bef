//! Client-side session and credential lifecycle for the Xenon admin API.
//!
//! `SessionManager` is the entry point: it signs in, resumes a stored session
//! once at startup, renews the short-lived access credential before it
//! expires and hands out an `ApiClient` that recovers from an expired
//! credential transparently. Audit chain verification results are read from
//! the server and classified, never recomputed.

pub mod api;
pub mod auth;
pub mod branch;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, AuditApi};
pub use auth::{AuthError, AuthState, GuardDecision, SessionManager};
pub use branch::{BranchContext, BranchError};
pub use config::{Config, StorageKind};
