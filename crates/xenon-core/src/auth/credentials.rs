use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::scheduler::RefreshScheduler;
use crate::models::UserProfile;

/// Keychain service name
const SERVICE_NAME: &str = "xenon";

/// Durable key holding the renewal credential
pub const RENEWAL_KEY: &str = "refresh_token";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable client storage for the renewal credential.
pub trait RenewalStorage: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn store(&self, value: &str) -> Result<(), StorageError>;
    fn remove(&self) -> Result<(), StorageError>;
}

/// Renewal credential in the OS keychain
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, RENEWAL_KEY)?)
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl RenewalStorage for KeyringStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, value: &str) -> Result<(), StorageError> {
        self.entry()?.set_password(value)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// Renewal credential in `session.json` under the cache directory
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl RenewalStorage for FileStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let file: SessionFile = serde_json::from_str(&contents)?;
        Ok(file.refresh_token)
    }

    fn store(&self, value: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = SessionFile {
            refresh_token: Some(value.to_string()),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    value: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
        }
    }
}

impl RenewalStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.value.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn store(&self, value: &str) -> Result<(), StorageError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[derive(Default)]
struct VolatileState {
    access: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
    /// Renewed access credential held back until its principal is known.
    staged: Option<(SecretString, DateTime<Utc>)>,
    principal: Option<UserProfile>,
    /// Bumped by every clear and login; renewals started under an older
    /// epoch are discarded.
    epoch: u64,
}

/// Point-in-time view of the session, read under one lock.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub has_access: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub principal: Option<UserProfile>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.has_access && self.principal.is_some()
    }
}

/// The single mutable shared resource of a session.
///
/// The access credential and principal live only in memory; the renewal
/// credential is written through to durable storage. An access credential is
/// only visible while a principal is present.
pub struct CredentialStore {
    volatile: RwLock<VolatileState>,
    storage: Box<dyn RenewalStorage>,
    scheduler: Arc<RefreshScheduler>,
}

impl CredentialStore {
    pub fn new(storage: Box<dyn RenewalStorage>, scheduler: Arc<RefreshScheduler>) -> Self {
        Self {
            volatile: RwLock::new(VolatileState::default()),
            storage,
            scheduler,
        }
    }

    pub fn access(&self) -> Option<SecretString> {
        self.read().access.clone()
    }

    /// Access credential together with the epoch it belongs to.
    pub fn access_with_epoch(&self) -> (Option<SecretString>, u64) {
        let state = self.read();
        (state.access.clone(), state.epoch)
    }

    /// True when an access credential other than `sent` is installed, i.e. a
    /// renewal or login completed after a request carrying `sent` went out.
    pub fn has_newer_access(&self, sent: Option<&SecretString>) -> bool {
        match (self.read().access.as_ref(), sent) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(current), Some(sent)) => current.expose_secret() != sent.expose_secret(),
        }
    }

    pub fn principal(&self) -> Option<UserProfile> {
        self.read().principal.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.read();
        state.access.is_some() && state.principal.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.read();
        SessionSnapshot {
            has_access: state.access.is_some(),
            expires_at: state.expires_at,
            principal: state.principal.clone(),
        }
    }

    /// Install a renewed access credential unless the session was cleared or
    /// replaced since `epoch` was read. The rotated renewal credential is
    /// written and `arm` is run under the same lock, so a concurrent clear
    /// either happens before all of it or undoes all of it.
    ///
    /// Without a principal (startup resume) the credential is staged until
    /// `install_principal` supplies one.
    pub fn install_renewed(
        &self,
        epoch: u64,
        access: SecretString,
        expires_in_secs: u64,
        rotated: Option<&SecretString>,
        arm: impl FnOnce(),
    ) -> bool {
        let mut state = self.write();
        if state.epoch != epoch {
            return false;
        }
        let expires = expires_at(expires_in_secs);
        if state.principal.is_some() {
            state.access = Some(access);
            state.expires_at = Some(expires);
        } else {
            state.staged = Some((access, expires));
        }
        if let Some(rotated) = rotated {
            if let Err(e) = self.storage.store(rotated.expose_secret()) {
                warn!(error = %e, "Failed to store rotated renewal credential");
            }
        }
        arm();
        true
    }

    /// Install the principal fetched for the session started under `epoch`,
    /// publishing a staged access credential with it.
    pub fn install_principal(&self, epoch: u64, principal: UserProfile) -> bool {
        let mut state = self.write();
        if state.epoch != epoch {
            return false;
        }
        if let Some((access, expires)) = state.staged.take() {
            state.access = Some(access);
            state.expires_at = Some(expires);
        }
        state.principal = Some(principal);
        true
    }

    /// Populate the volatile half in one step (login). Starts a new epoch, so
    /// renewals begun for an earlier session cannot touch this one.
    pub fn establish(&self, secret: SecretString, expires_in_secs: u64, principal: UserProfile) {
        let mut state = self.write();
        state.access = Some(secret);
        state.expires_at = Some(expires_at(expires_in_secs));
        state.staged = None;
        state.principal = Some(principal);
        state.epoch = state.epoch.wrapping_add(1);
    }

    /// Renewal credential from durable storage. Unreadable storage counts as absent.
    pub fn renewal(&self) -> Option<SecretString> {
        match self.storage.load() {
            Ok(value) => value.filter(|v| !v.is_empty()).map(SecretString::from),
            Err(e) => {
                warn!(error = %e, "Failed to read renewal credential");
                None
            }
        }
    }

    /// Write-through; `None` deletes the durable entry.
    pub fn set_renewal(&self, secret: Option<&SecretString>) -> Result<(), StorageError> {
        match secret {
            Some(secret) => self.storage.store(secret.expose_secret()),
            None => self.storage.remove(),
        }
    }

    /// Clear access credential, principal and renewal credential together and
    /// cancel the refresh timer. Readers never observe a partial clear.
    pub fn clear_all(&self) {
        let mut state = self.write();
        self.clear_locked(&mut state);
    }

    /// `clear_all`, unless another session was established or cleared since
    /// `epoch` was read. Returns whether the session was cleared.
    pub fn clear_if_current(&self, epoch: u64) -> bool {
        let mut state = self.write();
        if state.epoch != epoch {
            return false;
        }
        self.clear_locked(&mut state);
        true
    }

    fn clear_locked(&self, state: &mut VolatileState) {
        state.access = None;
        state.expires_at = None;
        state.staged = None;
        state.principal = None;
        state.epoch = state.epoch.wrapping_add(1);
        if let Err(e) = self.storage.remove() {
            warn!(error = %e, "Failed to remove renewal credential from storage");
        }
        self.scheduler.cancel();
        info!("Session cleared");
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VolatileState> {
        self.volatile.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, VolatileState> {
        self.volatile.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn expires_at(expires_in_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(expires_in_secs).unwrap_or(i64::MAX / 1000);
    Utc::now() + Duration::seconds(secs)
}
