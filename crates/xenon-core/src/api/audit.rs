//! Audit log endpoints (`/auditoria`).
//!
//! The client never computes hashes. `verify_chain` only reads the server's
//! report and classifies it.

use tracing::{info, warn};

use super::client::ApiClient;
use super::error::ApiError;
use crate::models::{AuditEntry, AuditPage, AuditStats, ChainVerdict, ListAuditParams, VerificationReport};

const AUDIT: &str = "auditoria";

pub struct AuditApi<'a> {
    client: &'a ApiClient,
}

impl<'a> AuditApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// `GET /auditoria` with filters and pagination
    pub async fn list(&self, params: &ListAuditParams) -> Result<AuditPage, ApiError> {
        self.client.get_with_query(&[AUDIT], params).await
    }

    /// `GET /auditoria/{id}`
    pub async fn get(&self, id: &str) -> Result<AuditEntry, ApiError> {
        self.client.get(&[AUDIT, id]).await
    }

    /// `GET /auditoria/historial/{entity}/{entity_id}`
    pub async fn history(&self, entity: &str, entity_id: &str) -> Result<Vec<AuditEntry>, ApiError> {
        self.client.get(&[AUDIT, "historial", entity, entity_id]).await
    }

    /// `GET /auditoria/stats`
    pub async fn stats(&self) -> Result<AuditStats, ApiError> {
        self.client.get(&[AUDIT, "stats"]).await
    }

    /// `GET /auditoria/verify`, unclassified
    pub async fn verify_report(&self) -> Result<VerificationReport, ApiError> {
        self.client.get(&[AUDIT, "verify"]).await
    }

    /// Server verdict on the hash chain.
    pub async fn verify_chain(&self) -> Result<ChainVerdict, ApiError> {
        let verdict = ChainVerdict::from_report(self.verify_report().await?);
        match &verdict {
            ChainVerdict::Intact { total_verified } => {
                info!(total_verified, "Audit chain intact");
            }
            ChainVerdict::Broken { mismatches, .. } => {
                warn!(
                    first = ?verdict.first_divergence().map(|m| m.id.as_str()),
                    count = mismatches.len(),
                    "Audit chain broken"
                );
            }
            ChainVerdict::Inconsistent { reason, .. } => {
                warn!(reason = ?reason, "Inconsistent audit verification report");
            }
        }
        Ok(verdict)
    }
}
