//! Session lifecycle: login, startup resolution, logout and route guarding.
//!
//! `SessionManager` owns every piece of session state. It is cheap to clone
//! and is handed to whoever needs it; there is no global session.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use super::coordinator::RefreshCoordinator;
use super::credentials::{
    CredentialStore, FileStorage, KeyringStorage, MemoryStorage, RenewalStorage, SessionSnapshot,
};
use super::error::{AuthError, AuthResult};
use super::scheduler::RefreshScheduler;
use super::state::{AuthState, AuthStateCell, SessionInput};
use crate::api::auth::AuthApi;
use crate::api::client::ApiClient;
use crate::api::transport::{ReqwestTransport, Transport};
use crate::branch::{BranchContext, BranchError};
use crate::config::{Config, StorageKind};
use crate::models::{Branch, MenuSection, Permission, UserProfile};

/// Outcome of a route guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Startup resolution has not finished; no decision yet
    Pending,
    LoginRequired,
    NoBranchSelected,
    Denied,
    Allowed,
}

struct Inner {
    store: Arc<CredentialStore>,
    scheduler: Arc<RefreshScheduler>,
    state: Arc<AuthStateCell>,
    coordinator: Arc<RefreshCoordinator>,
    auth: AuthApi,
    api: ApiClient,
    branch: Arc<BranchContext>,
    startup: OnceCell<()>,
    last_error: RwLock<Option<String>>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        base: Url,
        storage: Box<dyn RenewalStorage>,
        branch: BranchContext,
    ) -> Self {
        let scheduler = Arc::new(RefreshScheduler::new());
        let store = Arc::new(CredentialStore::new(storage, scheduler.clone()));
        let state = Arc::new(AuthStateCell::new());
        let branch = Arc::new(branch);
        let auth = AuthApi::new(transport.clone(), base.clone(), branch.clone());
        let coordinator =
            RefreshCoordinator::new(store.clone(), scheduler.clone(), state.clone(), auth.clone());
        let api = ApiClient::new(
            transport,
            base,
            store.clone(),
            branch.clone(),
            coordinator.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                store,
                scheduler,
                state,
                coordinator,
                auth,
                api,
                branch,
                startup: OnceCell::new(),
                last_error: RwLock::new(None),
            }),
        }
    }

    /// Wire the production transport, storage backend and branches from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.request_timeout_secs))
            .context("Failed to build HTTP client")?;
        let storage: Box<dyn RenewalStorage> = match config.storage {
            StorageKind::Keyring => Box::new(KeyringStorage::new()),
            StorageKind::File => Box::new(FileStorage::new(config.cache_dir()?)),
            StorageKind::Memory => Box::new(MemoryStorage::new()),
        };
        let branch = BranchContext::new(config.branches.clone(), config.branch_id.clone());
        Ok(Self::new(Arc::new(transport), config.api_url()?, storage, branch))
    }

    // ===== Lifecycle =====

    /// Sign in. On failure the session is left empty and `last_error` holds
    /// the localized message.
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<UserProfile> {
        let inner = &self.inner;
        let _ = inner.state.apply(SessionInput::LoginStarted);
        self.set_last_error(None);
        info!(username = username, "Logging in");

        let grant = match inner.auth.login(username, password).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(error = %e, "Login failed");
                inner.store.clear_all();
                let _ = inner.state.apply(SessionInput::Failed);
                self.set_last_error(Some(e.user_message()));
                return Err(e);
            }
        };

        let user = grant.user.clone();
        inner
            .store
            .establish(grant.access, grant.expires_in_secs, grant.user);
        match inner.store.set_renewal(Some(&grant.renewal)) {
            Ok(()) => inner.coordinator.schedule_renewal(grant.expires_in_secs),
            Err(e) => {
                warn!(error = %e, "Could not store renewal credential; session will end at expiry");
            }
        }
        inner.branch.restrict_to(&user.accessible_branches());
        let _ = inner.state.settle_established();
        self.set_last_error(None);
        // a login settles startup resolution too
        let _ = inner.startup.set(());

        info!(user = %user.login_name, role = %user.role, "Logged in");
        Ok(user)
    }

    /// Resolve the stored session once per process. Later calls return the
    /// current state without touching the network.
    pub async fn initialize(&self) -> AuthState {
        self.inner
            .startup
            .get_or_init(|| self.resolve_startup())
            .await;
        self.inner.state.current()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.startup.initialized()
    }

    /// Best-effort server logout; the local session is always cleared.
    pub async fn logout(&self) {
        let inner = &self.inner;
        if let Some(access) = inner.store.access() {
            let renewal = inner.store.renewal();
            if let Err(e) = inner.auth.logout(&access, renewal.as_ref()).await {
                warn!(error = %e, "Server logout failed; clearing local session anyway");
            }
        } else {
            debug!("No access credential; skipping server logout");
        }
        inner.store.clear_all();
        let _ = inner.state.apply(SessionInput::Cleared);
        self.set_last_error(None);
        info!("Logged out");
    }

    /// Renew now, joining a renewal already in flight.
    pub async fn refresh(&self) -> AuthResult<()> {
        self.inner.coordinator.refresh().await.map(|_| ())
    }

    async fn resolve_startup(&self) {
        let inner = &self.inner;
        if inner.store.renewal().is_none() {
            info!("No stored session");
            return;
        }

        let _ = inner.state.apply(SessionInput::ResumeStarted);
        info!("Resuming stored session");

        // a login or logout while resuming supersedes the stored session
        let renewed = match inner.coordinator.refresh().await {
            Ok(renewed) => renewed,
            Err(AuthError::SessionClosed) => {
                debug!("Stored session superseded while resuming");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Stored session could not be renewed");
                self.fail_startup(&e);
                return;
            }
        };

        match inner.auth.me(&renewed.access).await {
            Ok(user) => {
                let accessible: Vec<String> = user
                    .accessible_branches()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                let login_name = user.login_name.clone();
                if !inner.store.install_principal(renewed.epoch, user) {
                    debug!("Stored session superseded while loading profile");
                    return;
                }
                inner.branch.restrict_to(&accessible);
                let _ = inner.state.settle_established();
                info!(user = %login_name, "Session resumed");
            }
            Err(e) => {
                if !inner.store.clear_if_current(renewed.epoch) {
                    debug!(error = %e, "Profile lookup failed for a superseded session");
                    return;
                }
                // a renewed credential without a principal is not a session
                warn!(error = %e, "Profile lookup failed; ending session");
                self.fail_startup(&e);
            }
        }
    }

    fn fail_startup(&self, error: &AuthError) {
        if self.inner.store.is_authenticated() {
            debug!("A newer session is in place; startup failure ignored");
            return;
        }
        if self.inner.state.current() != AuthState::Unauthenticated {
            let _ = self.inner.state.apply(SessionInput::Failed);
        }
        self.set_last_error(Some(error.user_message()));
    }

    // ===== Queries =====

    pub fn state(&self) -> AuthState {
        self.inner.state.current()
    }

    /// True iff both the access credential and the principal are present.
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.is_authenticated()
    }

    pub fn principal(&self) -> Option<UserProfile> {
        self.inner.store.principal()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.store.snapshot()
    }

    /// Every state change, including a logout caused by a failed background renewal.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Localized message of the last failed login or startup resolution.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn time_until_refresh(&self) -> Option<Duration> {
        self.inner.scheduler.time_until_fire()
    }

    pub fn has_stored_session(&self) -> bool {
        self.inner.store.renewal().is_some()
    }

    /// Authenticated API client sharing this session's credentials.
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn branches(&self) -> &BranchContext {
        &self.inner.branch
    }

    pub fn select_branch(&self, id: &str) -> Result<Branch, BranchError> {
        self.inner.branch.select(id)
    }

    /// Route guard for `section` in the current branch.
    pub fn guard(&self, section: MenuSection, action: Permission) -> GuardDecision {
        if !self.is_initialized() {
            return GuardDecision::Pending;
        }
        let snapshot = self.inner.store.snapshot();
        let Some(principal) = snapshot.principal.filter(|_| snapshot.has_access) else {
            return GuardDecision::LoginRequired;
        };
        let Some(branch_id) = self.inner.branch.current_id() else {
            return GuardDecision::NoBranchSelected;
        };
        if principal.has_permission(&branch_id, section, action) {
            GuardDecision::Allowed
        } else {
            GuardDecision::Denied
        }
    }

    fn set_last_error(&self, message: Option<String>) {
        *self
            .inner
            .last_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = message;
    }
}
