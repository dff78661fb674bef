//! Session state machine.
//!
//! ```text
//! Unauthenticated ──LoginStarted / ResumeStarted──► Authenticating
//! Authenticating  ──Established───────────────────► Authenticated
//! Authenticated   ──RenewalSucceeded──────────────► Authenticated
//! any             ──Failed / Cleared──────────────► Unauthenticated
//! ```
//!
//! Startup resolution ("initialized") is a one-shot flag kept by the session,
//! not a state here.

use std::sync::{Mutex, PoisonError};

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use super::error::{AuthError, AuthResult};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Unauthenticated)

    Unauthenticated => {
        LoginStarted => Authenticating,
        ResumeStarted => Authenticating,
        Failed => Unauthenticated,
        Cleared => Unauthenticated
    },
    Authenticating => {
        LoginStarted => Authenticating,
        // startup renewal done, principal still loading
        RenewalSucceeded => Authenticating,
        Established => Authenticated,
        Failed => Unauthenticated,
        Cleared => Unauthenticated
    },
    Authenticated => {
        LoginStarted => Authenticating,
        RenewalSucceeded => Authenticated,
        Failed => Unauthenticated,
        Cleared => Unauthenticated
    }
}

pub use session_machine::Input as SessionInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Authentication state for UI consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&SessionMachineState> for AuthState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unauthenticated => AuthState::Unauthenticated,
            SessionMachineState::Authenticating => AuthState::Authenticating,
            SessionMachineState::Authenticated => AuthState::Authenticated,
        }
    }
}

/// Owns the machine and publishes every change on a watch channel.
pub struct AuthStateCell {
    machine: Mutex<SessionMachine>,
    tx: watch::Sender<AuthState>,
}

impl AuthStateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthState::Unauthenticated);
        Self {
            machine: Mutex::new(SessionMachine::new()),
            tx,
        }
    }

    pub fn current(&self) -> AuthState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    /// Feed one input to the machine. Rejected inputs leave the state unchanged.
    pub fn apply(&self, input: SessionInput) -> AuthResult<AuthState> {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        let from = AuthState::from(machine.state());

        if machine.consume(&input).is_err() {
            warn!(state = %from, input = ?input, "Rejected auth state transition");
            return Err(AuthError::InvalidStateTransition(format!(
                "{:?} in state {}",
                input, from
            )));
        }

        Ok(self.publish(from, &machine))
    }

    /// Record a session that was just established. A failure applied while
    /// the login was in flight may have reset the machine; the login still
    /// wins because its credentials are the ones in the store.
    pub fn settle_established(&self) -> AuthResult<AuthState> {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        let from = AuthState::from(machine.state());

        if from == AuthState::Unauthenticated {
            let _ = machine.consume(&SessionInput::LoginStarted);
        }
        if machine.consume(&SessionInput::Established).is_err() {
            warn!(state = %from, "Rejected auth state transition");
            return Err(AuthError::InvalidStateTransition(format!(
                "Established in state {}",
                from
            )));
        }
        Ok(self.publish(from, &machine))
    }

    fn publish(&self, from: AuthState, machine: &SessionMachine) -> AuthState {
        let to = AuthState::from(machine.state());
        if from != to {
            info!(from = %from, to = %to, "Auth state changed");
        }
        self.tx.send_replace(to);
        to
    }
}

impl Default for AuthStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_unauthenticated() {
        let cell = AuthStateCell::new();
        assert_eq!(cell.current(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_login_flow() {
        let cell = AuthStateCell::new();
        assert_eq!(cell.apply(SessionInput::LoginStarted).unwrap(), AuthState::Authenticating);
        assert_eq!(cell.apply(SessionInput::Established).unwrap(), AuthState::Authenticated);
        assert_eq!(cell.apply(SessionInput::RenewalSucceeded).unwrap(), AuthState::Authenticated);
        assert_eq!(cell.apply(SessionInput::Cleared).unwrap(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_resume_flow_waits_for_principal() {
        let cell = AuthStateCell::new();
        cell.apply(SessionInput::ResumeStarted).unwrap();
        assert_eq!(cell.apply(SessionInput::RenewalSucceeded).unwrap(), AuthState::Authenticating);
        assert_eq!(cell.apply(SessionInput::Established).unwrap(), AuthState::Authenticated);
    }

    #[test]
    fn test_failure_returns_to_unauthenticated() {
        let cell = AuthStateCell::new();
        cell.apply(SessionInput::LoginStarted).unwrap();
        assert_eq!(cell.apply(SessionInput::Failed).unwrap(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_cannot_establish_without_authenticating() {
        let cell = AuthStateCell::new();
        let err = cell.apply(SessionInput::Established).unwrap_err();
        assert!(matches!(err, AuthError::InvalidStateTransition(_)));
        assert_eq!(cell.current(), AuthState::Unauthenticated);

        assert!(cell.apply(SessionInput::RenewalSucceeded).is_err());
    }

    #[test]
    fn test_settle_established_after_concurrent_failure() {
        let cell = AuthStateCell::new();
        cell.apply(SessionInput::LoginStarted).unwrap();
        cell.apply(SessionInput::Failed).unwrap();

        assert_eq!(cell.settle_established().unwrap(), AuthState::Authenticated);
        // already there: the self-loop is not a valid input
        assert!(cell.settle_established().is_err());
        assert_eq!(cell.current(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let cell = AuthStateCell::new();
        let mut rx = cell.subscribe();

        cell.apply(SessionInput::LoginStarted).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AuthState::Authenticating);

        cell.apply(SessionInput::Established).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AuthState::Authenticated);
    }
}
