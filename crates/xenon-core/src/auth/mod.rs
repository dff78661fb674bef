//! Session and credential lifecycle.
//!
//! This module provides:
//! - `CredentialStore`: volatile access credential and principal, durable renewal credential
//! - `RefreshScheduler`: one timer that renews shortly before expiry
//! - `RefreshCoordinator`: single-flight renewal shared by all callers
//! - `AuthStateCell`: the session state machine and its change notifications
//! - `SessionManager`: login, startup resolution, logout and route guarding
//!
//! The access credential is never written to disk. A restart always costs one
//! renewal round trip before the session is usable.

pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod state;

pub use coordinator::{RefreshCoordinator, Renewed};
pub use credentials::{
    CredentialStore, FileStorage, KeyringStorage, MemoryStorage, RenewalStorage, SessionSnapshot,
    StorageError,
};
pub use error::{AuthError, AuthResult};
pub use scheduler::{refresh_delay, RefreshScheduler, REFRESH_BUFFER};
pub use session::{GuardDecision, SessionManager};
pub use state::{AuthState, AuthStateCell, SessionInput};
