//! Single-flight renewal.
//!
//! At most one renewal call is in flight. Callers arriving while it runs
//! await the same shared handle and receive the identical outcome. The
//! renewal itself runs in its own task, so a caller that gives up does not
//! cancel it for the others.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use super::credentials::CredentialStore;
use super::error::{AuthError, AuthResult};
use super::scheduler::RefreshScheduler;
use super::state::{AuthStateCell, SessionInput};
use crate::api::auth::AuthApi;

/// A completed renewal and the session epoch it was installed under.
#[derive(Debug, Clone)]
pub struct Renewed {
    pub access: SecretString,
    pub epoch: u64,
}

type SharedRenewal = Shared<BoxFuture<'static, AuthResult<Renewed>>>;

pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    scheduler: Arc<RefreshScheduler>,
    state: Arc<AuthStateCell>,
    auth: AuthApi,
    in_flight: Mutex<Option<SharedRenewal>>,
    this: Weak<Self>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        scheduler: Arc<RefreshScheduler>,
        state: Arc<AuthStateCell>,
        auth: AuthApi,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store,
            scheduler,
            state,
            auth,
            in_flight: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Renew the access credential, joining a renewal already in flight.
    ///
    /// Fails fast without a network call when no renewal credential is
    /// stored. `SessionClosed` means the session was cleared or replaced while
    /// the call was in flight and nothing was touched. Any other failure
    /// clears the session; it is never retried here.
    pub async fn refresh(&self) -> AuthResult<Renewed> {
        let renewal = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight renewal");
                    existing.clone()
                }
                None => {
                    let Some(credential) = self.store.renewal() else {
                        debug!("No renewal credential; skipping renewal");
                        return Err(AuthError::NoRenewalCredential);
                    };
                    let Some(this) = self.this.upgrade() else {
                        return Err(AuthError::SessionClosed);
                    };
                    let task = tokio::spawn(async move {
                        let outcome = this.renew(credential).await;
                        this.finish();
                        outcome
                    });
                    let weak = self.this.clone();
                    let shared = async move {
                        match task.await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                if let Some(coordinator) = weak.upgrade() {
                                    coordinator.finish();
                                }
                                Err(AuthError::RenewalAborted(e.to_string()))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        renewal.await
    }

    pub fn is_renewing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Arm the proactive renewal timer for a credential valid for `expires_in_secs`.
    pub fn schedule_renewal(&self, expires_in_secs: u64) {
        let weak = self.this.clone();
        self.scheduler.schedule(expires_in_secs, move || async move {
            let Some(coordinator) = weak.upgrade() else {
                return;
            };
            if let Err(e) = coordinator.refresh().await {
                warn!(error = %e, "Scheduled renewal failed");
            }
        });
    }

    /// End the session a rejected request belonged to, unless it was
    /// already cleared or replaced.
    pub fn end_session(&self, epoch: u64) {
        if self.store.clear_if_current(epoch) {
            let _ = self.state.apply(SessionInput::Failed);
        }
    }

    async fn renew(&self, credential: SecretString) -> AuthResult<Renewed> {
        let epoch = self.store.epoch();
        info!("Renewing access credential");

        match self.auth.refresh(&credential).await {
            Ok(renewed) => {
                let expires_in = renewed.expires_in_secs;
                let installed = self.store.install_renewed(
                    epoch,
                    renewed.access.clone(),
                    expires_in,
                    renewed.renewal.as_ref(),
                    || self.schedule_renewal(expires_in),
                );
                if !installed {
                    warn!("Session changed during renewal; discarding renewed credential");
                    return Err(AuthError::SessionClosed);
                }
                // rejected only when nobody is signed in; already logged by the cell
                let _ = self.state.apply(SessionInput::RenewalSucceeded);
                info!(expires_in = expires_in, "Access credential renewed");
                Ok(Renewed {
                    access: renewed.access,
                    epoch,
                })
            }
            Err(e) => {
                if !self.store.clear_if_current(epoch) {
                    debug!(error = %e, "Renewal failed for a session that is already gone");
                    return Err(AuthError::SessionClosed);
                }
                warn!(error = %e, "Renewal failed; ending session");
                let _ = self.state.apply(SessionInput::Failed);
                Err(e)
            }
        }
    }

    fn finish(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use reqwest::{Method, Url};
    use secrecy::ExposeSecret;

    use crate::auth::credentials::MemoryStorage;
    use crate::auth::state::AuthState;
    use crate::branch::BranchContext;
    use crate::testing::{json_response, sample_user, FakeTransport, BASE_URL};

    struct Harness {
        transport: Arc<FakeTransport>,
        store: Arc<CredentialStore>,
        scheduler: Arc<RefreshScheduler>,
        state: Arc<AuthStateCell>,
        coordinator: Arc<RefreshCoordinator>,
    }

    fn harness(storage: MemoryStorage) -> Harness {
        let transport = FakeTransport::new();
        let scheduler = Arc::new(RefreshScheduler::new());
        let store = Arc::new(CredentialStore::new(Box::new(storage), scheduler.clone()));
        let state = Arc::new(AuthStateCell::new());
        let auth = AuthApi::new(
            transport.clone(),
            Url::parse(BASE_URL).unwrap(),
            Arc::new(BranchContext::default()),
        );
        let coordinator =
            RefreshCoordinator::new(store.clone(), scheduler.clone(), state.clone(), auth);
        Harness {
            transport,
            store,
            scheduler,
            state,
            coordinator,
        }
    }

    fn signed_in(h: &Harness) {
        h.state.apply(SessionInput::LoginStarted).unwrap();
        h.store.establish(SecretString::from("access-1"), 900, sample_user());
        h.state.apply(SessionInput::Established).unwrap();
    }

    #[tokio::test]
    async fn test_no_renewal_credential_fails_fast() {
        let h = harness(MemoryStorage::new());
        let err = h.coordinator.refresh().await.unwrap_err();
        assert_eq!(err, AuthError::NoRenewalCredential);
        assert_eq!(h.transport.calls_to("/api/auth/refresh"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_renewal() {
        let h = harness(MemoryStorage::with_value("renew-1"));
        signed_in(&h);
        h.transport.route_delayed(
            Method::POST,
            "/api/auth/refresh",
            Duration::from_millis(50),
            |_| json_response(200, serde_json::json!({"accessToken": "access-2", "expiresIn": 900})),
        );

        let outcomes = futures::future::join_all((0..8).map(|_| h.coordinator.refresh())).await;

        assert_eq!(h.transport.calls_to("/api/auth/refresh"), 1);
        for outcome in outcomes {
            assert_eq!(outcome.unwrap().access.expose_secret(), "access-2");
        }
        assert_eq!(h.store.access().unwrap().expose_secret(), "access-2");
        assert!(h.scheduler.is_armed());
        assert!(!h.coordinator.is_renewing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_is_shared_and_clears_session() {
        let h = harness(MemoryStorage::with_value("renew-1"));
        signed_in(&h);
        h.transport.route_delayed(
            Method::POST,
            "/api/auth/refresh",
            Duration::from_millis(50),
            |_| json_response(401, serde_json::json!({"message": "Token expirado"})),
        );

        let outcomes = futures::future::join_all((0..5).map(|_| h.coordinator.refresh())).await;

        assert_eq!(h.transport.calls_to("/api/auth/refresh"), 1);
        let first = outcomes[0].clone().unwrap_err();
        assert!(matches!(first, AuthError::RenewalRejected(_)));
        for outcome in &outcomes {
            assert_eq!(outcome.as_ref().unwrap_err(), &first);
        }
        assert!(h.store.access().is_none());
        assert!(h.store.principal().is_none());
        assert!(h.store.renewal().is_none());
        assert!(!h.scheduler.is_armed());
        assert_eq!(h.state.current(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_transport_failure_is_terminal() {
        let h = harness(MemoryStorage::with_value("renew-1"));
        signed_in(&h);
        h.transport.route_result(Method::POST, "/api/auth/refresh", Duration::ZERO, |_| {
            Err(crate::api::transport::TransportError::Timeout)
        });

        let err = h.coordinator.refresh().await.unwrap_err();
        assert!(err.is_transient());
        assert!(h.store.renewal().is_none());
        assert_eq!(h.transport.calls_to("/api/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn test_rotated_renewal_credential_is_stored() {
        let h = harness(MemoryStorage::with_value("renew-1"));
        signed_in(&h);
        h.transport.route(Method::POST, "/api/auth/refresh", |_| {
            json_response(
                200,
                serde_json::json!({"accessToken": "access-2", "refreshToken": "renew-2", "expiresIn": 900}),
            )
        });

        h.coordinator.refresh().await.unwrap();
        assert_eq!(h.store.renewal().unwrap().expose_secret(), "renew-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_renewal_discards_result() {
        let h = harness(MemoryStorage::with_value("renew-1"));
        signed_in(&h);
        h.transport.route_delayed(
            Method::POST,
            "/api/auth/refresh",
            Duration::from_millis(100),
            |_| {
                json_response(
                    200,
                    serde_json::json!({"accessToken": "late", "refreshToken": "renew-2", "expiresIn": 900}),
                )
            },
        );

        let coordinator = h.coordinator.clone();
        let pending = tokio::spawn(async move { coordinator.refresh().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.store.clear_all();

        let outcome = pending.await.unwrap();
        assert_eq!(outcome.unwrap_err(), AuthError::SessionClosed);
        assert!(h.store.access().is_none());
        assert!(h.store.renewal().is_none());
        assert!(!h.scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_leaves_newer_session_alone() {
        let h = harness(MemoryStorage::with_value("renew-1"));
        signed_in(&h);
        h.transport.route_delayed(
            Method::POST,
            "/api/auth/refresh",
            Duration::from_millis(100),
            |_| json_response(401, serde_json::json!({})),
        );

        let coordinator = h.coordinator.clone();
        let pending = tokio::spawn(async move { coordinator.refresh().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.store.establish(SecretString::from("access-9"), 900, sample_user());

        let outcome = pending.await.unwrap();
        assert_eq!(outcome.unwrap_err(), AuthError::SessionClosed);
        assert_eq!(h.store.access().unwrap().expose_secret(), "access-9");
        assert!(h.store.renewal().is_some());
        assert_eq!(h.state.current(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_end_session_only_clears_current_epoch() {
        let h = harness(MemoryStorage::new());
        signed_in(&h);
        let stale = h.store.epoch();
        h.store.establish(SecretString::from("access-2"), 900, sample_user());

        h.coordinator.end_session(stale);
        assert!(h.store.is_authenticated());

        h.coordinator.end_session(h.store.epoch());
        assert!(!h.store.is_authenticated());
        assert_eq!(h.state.current(), AuthState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_renewal_fires_before_expiry() {
        let h = harness(MemoryStorage::with_value("renew-1"));
        signed_in(&h);
        h.transport.route(Method::POST, "/api/auth/refresh", |_| {
            json_response(200, serde_json::json!({"accessToken": "access-2", "expiresIn": 900}))
        });

        h.coordinator.schedule_renewal(61);
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(h.transport.calls_to("/api/auth/refresh"), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.transport.calls_to("/api/auth/refresh"), 1);
        assert_eq!(h.store.access().unwrap().expose_secret(), "access-2");
        // re-armed for the new credential
        let next = h.scheduler.time_until_fire().unwrap();
        assert!(next > Duration::from_secs(839) && next <= Duration::from_secs(840));
    }
}
