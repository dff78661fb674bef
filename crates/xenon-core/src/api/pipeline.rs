//! Request pipeline stages.
//!
//! A request goes through `decorate`, the transport, then `classify`. The
//! caller decides what to do with each class using an explicit `Attempt`
//! that travels alongside the request.

use std::time::Duration;

use reqwest::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};

use super::error::ApiError;
use super::transport::{HttpRequest, HttpResponse};

/// Branch scoping header sent with every request.
pub const BRANCH_HEADER: &str = "X-Sucursal-Id";

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
/// 1 second is polite to the server while not making users wait too long.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Attach the bearer credential and branch header, replacing any left over
/// from a previous attempt.
pub fn decorate(
    request: &mut HttpRequest,
    access: Option<&SecretString>,
    branch_id: Option<&str>,
) -> Result<(), InvalidHeaderValue> {
    match access {
        Some(secret) => {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", secret.expose_secret()))?;
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        None => {
            request.headers.remove(AUTHORIZATION);
        }
    }
    match branch_id {
        Some(id) => {
            request.headers.insert(BRANCH_HEADER, HeaderValue::from_str(id)?);
        }
        None => {
            request.headers.remove(BRANCH_HEADER);
        }
    }
    Ok(())
}

#[derive(Debug)]
pub enum ResponseClass {
    Ok(HttpResponse),
    /// 401: recoverable once through renewal
    AuthRejected(ApiError),
    /// 429: recoverable through backoff
    RateLimited,
    /// Terminal for this request
    Failed(ApiError),
}

pub fn classify(response: HttpResponse) -> ResponseClass {
    if response.status.is_success() {
        return ResponseClass::Ok(response);
    }
    match response.status {
        StatusCode::UNAUTHORIZED => ResponseClass::AuthRejected(ApiError::from_response(&response)),
        StatusCode::TOO_MANY_REQUESTS => ResponseClass::RateLimited,
        _ => ResponseClass::Failed(ApiError::from_response(&response)),
    }
}

/// Retry bookkeeping for one original request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attempt {
    auth_retried: bool,
    rate_limit_retries: u32,
}

impl Attempt {
    pub fn first() -> Self {
        Self::default()
    }

    /// An authorization failure may be recovered only once per request.
    pub fn can_retry_auth(&self) -> bool {
        !self.auth_retried
    }

    pub fn with_auth_retry(self) -> Self {
        Self {
            auth_retried: true,
            ..self
        }
    }

    /// Backoff before the next rate-limit retry, or `None` once exhausted.
    pub fn rate_limit_backoff(&self) -> Option<Duration> {
        if self.rate_limit_retries >= MAX_RATE_LIMIT_RETRIES {
            return None;
        }
        Some(Duration::from_millis(
            INITIAL_BACKOFF_MS << self.rate_limit_retries,
        ))
    }

    pub fn with_rate_limit_retry(self) -> Self {
        Self {
            rate_limit_retries: self.rate_limit_retries + 1,
            ..self
        }
    }

    pub fn rate_limit_retries(&self) -> u32 {
        self.rate_limit_retries
    }
}
