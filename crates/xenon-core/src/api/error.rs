use thiserror::Error;

use super::transport::{HttpResponse, TransportError};

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized { message: Option<String> },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Fallback shown when nothing more specific is known
pub const GENERIC_ERROR_MESSAGE: &str = "Ocurrió un error inesperado";

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized { message: None },
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Like `from_status`, but keeps the server's own message where the UI shows it.
    pub fn from_response(response: &HttpResponse) -> Self {
        match Self::from_status(response.status, &response.body) {
            ApiError::Unauthorized { .. } => ApiError::Unauthorized {
                message: response.server_message(),
            },
            other => other,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Localized message for the UI. Server-provided text wins over generic text.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized { message: Some(m) } => m.clone(),
            ApiError::Unauthorized { message: None } => {
                "Tu sesión ha expirado. Inicia sesión nuevamente.".to_string()
            }
            ApiError::AccessDenied(body) | ApiError::NotFound(body) | ApiError::ServerError(body) => {
                server_message_from_body(body).unwrap_or_else(|| match self {
                    ApiError::AccessDenied(_) => {
                        "No tienes permiso para realizar esta acción.".to_string()
                    }
                    ApiError::NotFound(_) => "El recurso solicitado no existe.".to_string(),
                    _ => "El servidor no pudo procesar la solicitud.".to_string(),
                })
            }
            ApiError::RateLimited => {
                "Demasiadas solicitudes. Espera un momento e intenta de nuevo.".to_string()
            }
            ApiError::Transport(e) => transport_message(e).to_string(),
            ApiError::InvalidResponse(_) | ApiError::Decode(_) | ApiError::InvalidRequest(_) => {
                GENERIC_ERROR_MESSAGE.to_string()
            }
        }
    }
}

fn server_message_from_body(body: &str) -> Option<String> {
    HttpResponse::new(reqwest::StatusCode::OK, body).server_message()
}

/// Localized diagnostic for failures below HTTP
pub fn transport_message(error: &TransportError) -> &'static str {
    match error {
        TransportError::Timeout => "La conexión con el servidor expiró. Intenta de nuevo.",
        TransportError::Connect(_) | TransportError::Other(_) => {
            "No se pudo conectar con el servidor. Verifica tu conexión a internet."
        }
    }
}
