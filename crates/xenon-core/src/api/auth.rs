//! Authentication endpoints.
//!
//! These calls bypass the renewal retry of `ApiClient`: the session drives
//! them directly and decides what a failure means.

use std::sync::Arc;

use reqwest::{Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pipeline::decorate;
use super::transport::{endpoint, HttpRequest, HttpResponse, Transport};
use crate::auth::{AuthError, AuthResult};
use crate::branch::BranchContext;
use crate::models::UserProfile;

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub access: SecretString,
    pub renewal: SecretString,
    pub expires_in_secs: u64,
    pub user: UserProfile,
}

/// Result of a successful renewal.
#[derive(Debug, Clone)]
pub struct RenewedAccess {
    pub access: SecretString,
    pub expires_in_secs: u64,
    /// Present when the server rotates the renewal credential
    pub renewal: Option<SecretString>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(alias = "accessCredential")]
    access_token: String,
    #[serde(alias = "renewalCredential")]
    refresh_token: String,
    #[serde(alias = "expiresInSeconds")]
    expires_in: u64,
    user: UserProfile,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenewalRequest<'a> {
    refresh_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(alias = "accessCredential")]
    access_token: String,
    #[serde(alias = "expiresInSeconds")]
    expires_in: u64,
    #[serde(default, alias = "renewalCredential")]
    refresh_token: Option<String>,
}

#[derive(Clone)]
pub struct AuthApi {
    transport: Arc<dyn Transport>,
    base: Url,
    branch: Arc<BranchContext>,
}

impl AuthApi {
    pub fn new(transport: Arc<dyn Transport>, base: Url, branch: Arc<BranchContext>) -> Self {
        Self {
            transport,
            base,
            branch,
        }
    }

    /// `POST /auth/login`
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<LoginGrant> {
        let body = serde_json::to_value(LoginRequest { username, password })
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let request = HttpRequest::new(Method::POST, endpoint(&self.base, &["auth", "login"]))
            .with_body(body);

        let response = self.send(request, None).await?;
        match response.status {
            s if s.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::InvalidCredentials(
                    response.server_message().unwrap_or_default(),
                ));
            }
            _ => return Err(unexpected(&response)),
        }

        let parsed: LoginResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(format!("login response: {}", e)))?;
        Ok(LoginGrant {
            access: parsed.access_token.into(),
            renewal: parsed.refresh_token.into(),
            expires_in_secs: parsed.expires_in,
            user: parsed.user,
        })
    }

    /// `POST /auth/refresh`
    pub async fn refresh(&self, renewal: &SecretString) -> AuthResult<RenewedAccess> {
        let body = serde_json::to_value(RenewalRequest {
            refresh_token: Some(renewal.expose_secret()),
        })
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let request = HttpRequest::new(Method::POST, endpoint(&self.base, &["auth", "refresh"]))
            .with_body(body);

        let response = self.send(request, None).await?;
        match response.status {
            s if s.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::RenewalRejected(
                    response
                        .server_message()
                        .unwrap_or_else(|| response.status.to_string()),
                ));
            }
            _ => return Err(unexpected(&response)),
        }

        let parsed: RefreshResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(format!("refresh response: {}", e)))?;
        Ok(RenewedAccess {
            access: parsed.access_token.into(),
            expires_in_secs: parsed.expires_in,
            renewal: parsed
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
        })
    }

    /// `GET /auth/me`
    pub async fn me(&self, access: &SecretString) -> AuthResult<UserProfile> {
        let request = HttpRequest::new(Method::GET, endpoint(&self.base, &["auth", "me"]));
        let response = self.send(request, Some(access)).await?;
        if !response.status.is_success() {
            return Err(AuthError::PrincipalUnavailable(
                response
                    .server_message()
                    .unwrap_or_else(|| response.status.to_string()),
            ));
        }
        response
            .json()
            .map_err(|e| AuthError::PrincipalUnavailable(format!("profile response: {}", e)))
    }

    /// `POST /auth/logout`
    pub async fn logout(
        &self,
        access: &SecretString,
        renewal: Option<&SecretString>,
    ) -> AuthResult<()> {
        let body = serde_json::to_value(RenewalRequest {
            refresh_token: renewal.map(ExposeSecret::expose_secret),
        })
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let request = HttpRequest::new(Method::POST, endpoint(&self.base, &["auth", "logout"]))
            .with_body(body);

        let response = self.send(request, Some(access)).await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(unexpected(&response))
        }
    }

    async fn send(
        &self,
        mut request: HttpRequest,
        access: Option<&SecretString>,
    ) -> AuthResult<HttpResponse> {
        decorate(&mut request, access, self.branch.current_id().as_deref())
            .map_err(|e| AuthError::InvalidResponse(format!("invalid header value: {}", e)))?;
        debug!(method = %request.method, path = request.url.path(), "Auth request");
        Ok(self.transport.execute(request).await?)
    }
}

fn unexpected(response: &HttpResponse) -> AuthError {
    let detail = response
        .server_message()
        .unwrap_or_else(|| response.status.to_string());
    if response.status.is_server_error() {
        AuthError::Server(detail)
    } else {
        AuthError::InvalidResponse(detail)
    }
}
