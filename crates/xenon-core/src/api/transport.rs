//! HTTP transport seam.
//!
//! Everything above this module talks to `Transport`, so the session and
//! pipeline logic can be exercised without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Failure below the HTTP layer (no status code was received).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Could not connect: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of the bearer credential attached to this request, if any
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Deserialize)]
struct ServerMessage {
    message: Option<String>,
    error: Option<String>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// The `message` (or `error`) field of a JSON error body.
    pub fn server_message(&self) -> Option<String> {
        let parsed: ServerMessage = serde_json::from_str(&self.body).ok()?;
        parsed
            .message
            .or(parsed.error)
            .filter(|m| !m.trim().is_empty())
    }
}

/// Build an endpoint URL from the API base and unencoded path segments.
pub fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by `reqwest`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_encoded_segments() {
        let base = Url::parse("https://xenon.test/api").unwrap();
        let url = endpoint(&base, &["auditoria", "historial", "cliente", "a b/c"]);
        assert_eq!(
            url.as_str(),
            "https://xenon.test/api/auditoria/historial/cliente/a%20b%2Fc"
        );
    }

    #[test]
    fn test_endpoint_with_trailing_slash_base() {
        let base = Url::parse("https://xenon.test/api/").unwrap();
        let url = endpoint(&base, &["auth", "login"]);
        assert_eq!(url.as_str(), "https://xenon.test/api/auth/login");
    }

    #[test]
    fn test_server_message_prefers_message_field() {
        let resp = HttpResponse::new(
            StatusCode::UNAUTHORIZED,
            r#"{"message": "Credenciales inválidas", "error": "x"}"#,
        );
        assert_eq!(resp.server_message().as_deref(), Some("Credenciales inválidas"));

        let resp = HttpResponse::new(StatusCode::BAD_REQUEST, r#"{"error": "bad"}"#);
        assert_eq!(resp.server_message().as_deref(), Some("bad"));

        let resp = HttpResponse::new(StatusCode::BAD_GATEWAY, "<html>");
        assert_eq!(resp.server_message(), None);
    }
}
