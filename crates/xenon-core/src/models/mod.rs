//! Data models for the Xenon admin API.
//!
//! - `UserProfile`, `BranchGrant`: the signed-in principal and its per-branch grants
//! - `Branch`: operational scoping unit sent with every request
//! - Audit types: `AuditEntry`, `VerificationReport` and the client-side `ChainVerdict`

pub mod audit;
pub mod branch;
pub mod user;

pub use audit::{
    AuditAction, AuditEntry, AuditPage, AuditStats, ChainVerdict, DailyCount, HashMismatch,
    Inconsistency, ListAuditParams, Pagination, VerificationReport,
};
pub use branch::Branch;
pub use user::{BranchGrant, MenuSection, Permission, Role, UserProfile};
