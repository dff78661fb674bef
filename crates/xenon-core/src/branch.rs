//! Current operational branch.
//!
//! The selected branch id is sent as `X-Sucursal-Id` on every request.
//! Selection policy:
//! - exactly one available branch is always selected
//! - with several, a still-valid current selection is kept, else the
//!   preferred id (last persisted choice), else nothing until `select`

use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info};

use crate::models::Branch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BranchError {
    #[error("Unknown branch: {0}")]
    Unknown(String),
}

#[derive(Debug, Default)]
struct BranchState {
    /// Every branch with a known name
    known: Vec<Branch>,
    available: Vec<Branch>,
    current: Option<Branch>,
    preferred: Option<String>,
}

impl BranchState {
    fn find(&self, id: &str) -> Option<&Branch> {
        self.available.iter().find(|b| b.id == id)
    }

    fn reconcile(&mut self) {
        let next = match self.available.as_slice() {
            [only] => Some(only.clone()),
            _ => self
                .current
                .as_ref()
                .and_then(|c| self.find(&c.id))
                .or_else(|| self.preferred.as_deref().and_then(|p| self.find(p)))
                .cloned(),
        };
        if next != self.current {
            debug!(branch = ?next.as_ref().map(|b| b.id.as_str()), "Branch selection reconciled");
        }
        self.current = next;
    }
}

#[derive(Debug, Default)]
pub struct BranchContext {
    state: RwLock<BranchState>,
}

impl BranchContext {
    pub fn new(available: Vec<Branch>, preferred: Option<String>) -> Self {
        let mut state = BranchState {
            known: available.clone(),
            available,
            current: None,
            preferred,
        };
        state.reconcile();
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn current(&self) -> Option<Branch> {
        self.read().current.clone()
    }

    pub fn current_id(&self) -> Option<String> {
        self.read().current.as_ref().map(|b| b.id.clone())
    }

    pub fn available(&self) -> Vec<Branch> {
        self.read().available.clone()
    }

    /// Select a branch by id. Unknown ids are rejected and the selection is kept.
    pub fn select(&self, id: &str) -> Result<Branch, BranchError> {
        let mut state = self.write();
        let branch = state
            .find(id)
            .cloned()
            .ok_or_else(|| BranchError::Unknown(id.to_string()))?;
        state.preferred = Some(branch.id.clone());
        state.current = Some(branch.clone());
        info!(branch = %branch.id, "Branch selected");
        Ok(branch)
    }

    /// Limit the list to the given ids, in their order. Names come from the
    /// full known list; ids without a known name are kept under their id.
    pub fn restrict_to<S: AsRef<str>>(&self, ids: &[S]) {
        let mut state = self.write();
        let restricted = ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                state
                    .known
                    .iter()
                    .find(|b| b.id == id)
                    .cloned()
                    .unwrap_or_else(|| Branch::from_id(id))
            })
            .collect();
        state.available = restricted;
        state.reconcile();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BranchState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BranchState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
