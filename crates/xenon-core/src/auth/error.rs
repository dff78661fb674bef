//! Authentication error types.

use thiserror::Error;

use crate::api::error::{transport_message, GENERIC_ERROR_MESSAGE};
use crate::api::transport::TransportError;

/// Shown when the server rejects a login without its own message.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Credenciales inválidas";

const SESSION_EXPIRED_MESSAGE: &str = "Tu sesión ha expirado. Inicia sesión nuevamente.";

/// Authentication error type.
///
/// `Clone` because one renewal outcome is handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Login rejected by the server
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Renewal credential rejected or expired
    #[error("Renewal credential rejected: {0}")]
    RenewalRejected(String),

    /// Nothing stored to renew with
    #[error("No renewal credential stored")]
    NoRenewalCredential,

    /// The "who am I" lookup failed after a successful renewal
    #[error("Could not load user profile: {0}")]
    PrincipalUnavailable(String),

    /// Network unreachable, timeout, connection reset
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Server error: {0}")]
    Server(String),

    /// The session was cleared while this operation was in flight
    #[error("Session was cleared during the operation")]
    SessionClosed,

    /// The renewal task ended without producing an outcome
    #[error("Renewal aborted: {0}")]
    RenewalAborted(String),

    /// Invalid state transition in the session FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),
}

impl AuthError {
    /// Returns true if this error is transient and a user-initiated retry may succeed.
    ///
    /// Background renewal never retries on its own, whatever this says.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Transport(_) | AuthError::Server(_))
    }

    /// Localized message for the UI layer.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials(m) if !m.trim().is_empty() => m.clone(),
            AuthError::InvalidCredentials(_) => INVALID_CREDENTIALS_MESSAGE.to_string(),
            AuthError::RenewalRejected(_)
            | AuthError::NoRenewalCredential
            | AuthError::SessionClosed => SESSION_EXPIRED_MESSAGE.to_string(),
            AuthError::PrincipalUnavailable(_) => {
                "No se pudo cargar el perfil del usuario.".to_string()
            }
            AuthError::Transport(e) => transport_message(e).to_string(),
            AuthError::Server(_) => "El servidor no pudo procesar la solicitud.".to_string(),
            AuthError::InvalidResponse(_)
            | AuthError::RenewalAborted(_)
            | AuthError::InvalidStateTransition(_) => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_transport() {
        assert!(AuthError::Transport(TransportError::Timeout).is_transient());
        assert!(AuthError::Server("502".into()).is_transient());
    }

    #[test]
    fn test_is_not_transient_invalid_credentials() {
        assert!(!AuthError::InvalidCredentials("bad password".to_string()).is_transient());
        assert!(!AuthError::RenewalRejected("expired".to_string()).is_transient());
        assert!(!AuthError::NoRenewalCredential.is_transient());
    }

    #[test]
    fn test_invalid_credentials_message() {
        assert_eq!(
            AuthError::InvalidCredentials(String::new()).user_message(),
            "Credenciales inválidas"
        );
        assert_eq!(
            AuthError::InvalidCredentials("Usuario bloqueado".into()).user_message(),
            "Usuario bloqueado"
        );
    }

    #[test]
    fn test_transport_message_is_distinct() {
        let network = AuthError::Transport(TransportError::Connect("refused".into())).user_message();
        assert_ne!(network, INVALID_CREDENTIALS_MESSAGE);
        assert!(network.contains("conexión"));
    }
}
