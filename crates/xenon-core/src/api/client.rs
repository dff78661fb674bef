//! Authenticated API client.
//!
//! Every request goes through the pipeline: decorate with the current
//! credential and branch, send, classify. A 401 is recovered at most once
//! per request through the shared renewal; a 429 is retried with backoff.

use std::sync::Arc;

use reqwest::{Method, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::audit::AuditApi;
use super::error::ApiError;
use super::pipeline::{classify, decorate, Attempt, ResponseClass};
use super::transport::{endpoint, HttpRequest, HttpResponse, Transport};
use crate::auth::{AuthError, CredentialStore, RefreshCoordinator};
use crate::branch::BranchContext;

/// Clone is cheap - every field is shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base: Url,
    store: Arc<CredentialStore>,
    branch: Arc<BranchContext>,
    coordinator: Arc<RefreshCoordinator>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        base: Url,
        store: Arc<CredentialStore>,
        branch: Arc<BranchContext>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            transport,
            base,
            store,
            branch,
            coordinator,
        }
    }

    pub fn url(&self, segments: &[&str]) -> Url {
        endpoint(&self.base, segments)
    }

    pub fn audit(&self) -> AuditApi<'_> {
        AuditApi::new(self)
    }

    /// Send a request through the pipeline. Non-success statuses come back
    /// as `ApiError`.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut attempt = Attempt::first();

        loop {
            let (sent, epoch) = self.store.access_with_epoch();
            let mut outgoing = request.clone();
            decorate(&mut outgoing, sent.as_ref(), self.branch.current_id().as_deref())
                .map_err(|e| ApiError::InvalidRequest(format!("invalid header value: {}", e)))?;

            let response = self.transport.execute(outgoing).await?;

            match classify(response) {
                ResponseClass::Ok(response) => return Ok(response),
                ResponseClass::Failed(error) => return Err(error),
                ResponseClass::AuthRejected(error) => {
                    if !attempt.can_retry_auth() {
                        debug!(path = request.url.path(), "Rejected again after renewal");
                        return Err(error);
                    }
                    attempt = attempt.with_auth_retry();
                    if self.store.has_newer_access(sent.as_ref()) {
                        debug!(
                            path = request.url.path(),
                            "Credential renewed since sending; retrying"
                        );
                        continue;
                    }
                    debug!(path = request.url.path(), "Unauthorized; renewing before retry");
                    match self.coordinator.refresh().await {
                        Ok(_) => {}
                        Err(AuthError::SessionClosed)
                            if self.store.has_newer_access(sent.as_ref()) =>
                        {
                            debug!(
                                path = request.url.path(),
                                "Session replaced during renewal; retrying"
                            );
                        }
                        Err(AuthError::NoRenewalCredential) => {
                            warn!(
                                path = request.url.path(),
                                "Rejected with no renewal credential; ending session"
                            );
                            self.coordinator.end_session(epoch);
                            return Err(error);
                        }
                        Err(e) => {
                            // the coordinator has already ended the session
                            warn!(path = request.url.path(), error = %e, "Renewal failed");
                            return Err(error);
                        }
                    }
                }
                ResponseClass::RateLimited => {
                    let Some(backoff) = attempt.rate_limit_backoff() else {
                        return Err(ApiError::RateLimited);
                    };
                    attempt = attempt.with_rate_limit_retry();
                    warn!(
                        path = request.url.path(),
                        retry = attempt.rate_limit_retries(),
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let request = HttpRequest::new(Method::GET, self.url(segments));
        decode(&self.send(request).await?)
    }

    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize>(
        &self,
        segments: &[&str],
        query: &Q,
    ) -> Result<T, ApiError> {
        let mut url = self.url(segments);
        append_query(&mut url, query)?;
        decode(&self.send(HttpRequest::new(Method::GET, url)).await?)
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    response.json().map_err(|e| ApiError::Decode(e.to_string()))
}

/// Append the fields of a flat serializable struct as query pairs. `null`
/// fields are skipped.
fn append_query<Q: Serialize>(url: &mut Url, query: &Q) -> Result<(), ApiError> {
    let value = serde_json::to_value(query).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    let serde_json::Value::Object(fields) = value else {
        return Err(ApiError::InvalidRequest("query must be an object".to_string()));
    };
    if fields.values().all(|v| v.is_null()) {
        return Ok(());
    }
    let mut pairs = url.query_pairs_mut();
    for (key, value) in fields {
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::String(s) => {
                pairs.append_pair(&key, &s);
            }
            other => {
                pairs.append_pair(&key, &other.to_string());
            }
        }
    }
    Ok(())
}
