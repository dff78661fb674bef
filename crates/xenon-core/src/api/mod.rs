//! REST API access for the Xenon admin backend.
//!
//! - `transport`: the HTTP seam (`Transport`, `ReqwestTransport`)
//! - `pipeline`: request decoration and response classification
//! - `client`: `ApiClient`, which recovers expired credentials once per request
//! - `auth`: login, renewal, profile and logout endpoints
//! - `audit`: audit log reads and chain verification

pub mod audit;
pub mod auth;
pub mod client;
pub mod error;
pub mod pipeline;
pub mod transport;

pub use audit::AuditApi;
pub use auth::{AuthApi, LoginGrant, RenewedAccess};
pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
