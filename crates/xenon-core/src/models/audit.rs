use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of action recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    LoginFailed,
    RefreshFailed,
    #[serde(other)]
    Other,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::RefreshFailed => "REFRESH_FAILED",
            AuditAction::Other => "OTHER",
        }
    }
}

/// One record of the server's hash chain.
///
/// Hashes are opaque to this client; it never recomputes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    #[serde(rename = "secuencia", alias = "sequence")]
    pub sequence: u64,
    #[serde(rename = "hashActual", alias = "currentHash")]
    pub current_hash: String,
    /// None only for the genesis entry.
    #[serde(rename = "hashAnterior", alias = "previousHash")]
    pub previous_hash: Option<String>,
    #[serde(rename = "accion", alias = "action")]
    pub action: AuditAction,
    #[serde(rename = "entidad", alias = "entity")]
    pub entity: String,
    #[serde(rename = "entidadId", alias = "entityId")]
    pub entity_id: String,
    #[serde(rename = "usuarioId", default)]
    pub user_id: Option<String>,
    #[serde(rename = "usuarioNombre", default)]
    pub user_name: Option<String>,
    #[serde(rename = "sucursalId", default)]
    pub branch_id: Option<String>,
    #[serde(rename = "sucursalNombre", default)]
    pub branch_name: Option<String>,
    #[serde(rename = "pagina", default)]
    pub page: Option<String>,
    #[serde(rename = "componente", default)]
    pub component: Option<String>,
    #[serde(rename = "ipAddress", default)]
    pub ip_address: Option<String>,
    #[serde(rename = "userAgent", default)]
    pub user_agent: Option<String>,
    #[serde(rename = "valorAnterior", default)]
    pub before: Option<serde_json::Value>,
    #[serde(rename = "valorNuevo", default)]
    pub after: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Unix timestamp (seconds)
    #[serde(rename = "creadoEn", alias = "createdAt")]
    pub created_at: i64,
}

impl AuditEntry {
    pub fn is_genesis(&self) -> bool {
        self.sequence == 0
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created_at, 0)
    }
}

/// Filters for listing audit entries. Unset fields are omitted from the query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListAuditParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(rename = "usuarioId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "sucursalId", skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(rename = "accion", skip_serializing_if = "Option::is_none")]
    pub action: Option<AuditAction>,
    #[serde(rename = "entidad", skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(rename = "entidadId", skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(rename = "desde", skip_serializing_if = "Option::is_none")]
    pub from: Option<i64>,
    #[serde(rename = "hasta", skip_serializing_if = "Option::is_none")]
    pub to: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage {
    pub data: Vec<AuditEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCount {
    #[serde(rename = "fecha")]
    pub date: String,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    #[serde(rename = "totalEntradas")]
    pub total_entries: u64,
    #[serde(rename = "porAccion", default)]
    pub by_action: HashMap<String, u64>,
    #[serde(rename = "porEntidad", default)]
    pub by_entity: HashMap<String, u64>,
    #[serde(rename = "porDia", default)]
    pub by_day: Vec<DailyCount>,
}

/// One divergent entry named by the server's verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct HashMismatch {
    pub id: String,
    #[serde(rename = "esperado", alias = "expectedHash")]
    pub expected_hash: String,
    #[serde(rename = "encontrado", alias = "foundHash")]
    pub found_hash: String,
}

/// Raw result of `GET /auditoria/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct VerificationReport {
    #[serde(rename = "valido", alias = "valid")]
    pub valid: bool,
    #[serde(rename = "totalVerificados", alias = "totalVerified")]
    pub total_verified: u64,
    #[serde(rename = "errores", alias = "mismatches", default)]
    pub mismatches: Vec<HashMismatch>,
}

/// Client-side reading of a verification report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerdict {
    Intact {
        total_verified: u64,
    },
    Broken {
        total_verified: u64,
        mismatches: Vec<HashMismatch>,
    },
    /// The report contradicts itself; a protocol violation, not a broken chain.
    Inconsistent {
        reason: Inconsistency,
        report: VerificationReport,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconsistency {
    /// `valid=false` without naming any divergent entry
    InvalidWithoutMismatches,
    /// `valid=true` while listing divergent entries
    ValidWithMismatches,
}

impl ChainVerdict {
    pub fn from_report(report: VerificationReport) -> Self {
        match (report.valid, report.mismatches.is_empty()) {
            (true, true) => ChainVerdict::Intact {
                total_verified: report.total_verified,
            },
            (false, false) => ChainVerdict::Broken {
                total_verified: report.total_verified,
                mismatches: report.mismatches,
            },
            (false, true) => ChainVerdict::Inconsistent {
                reason: Inconsistency::InvalidWithoutMismatches,
                report,
            },
            (true, false) => ChainVerdict::Inconsistent {
                reason: Inconsistency::ValidWithMismatches,
                report,
            },
        }
    }

    pub fn is_intact(&self) -> bool {
        matches!(self, ChainVerdict::Intact { .. })
    }

    pub fn first_divergence(&self) -> Option<&HashMismatch> {
        match self {
            ChainVerdict::Broken { mismatches, .. } => mismatches.first(),
            _ => None,
        }
    }
}

impl fmt::Display for ChainVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainVerdict::Intact { total_verified } => write!(
                f,
                "Cadena de auditoría íntegra: {} entradas verificadas",
                total_verified
            ),
            ChainVerdict::Broken {
                total_verified,
                mismatches,
            } => {
                let Some(first) = mismatches.first() else {
                    return write!(
                        f,
                        "Cadena de auditoría rota; {} entradas verificadas",
                        total_verified
                    );
                };
                write!(
                    f,
                    "Cadena de auditoría rota en la entrada {}: se esperaba el hash {} y se encontró {}",
                    first.id, first.expected_hash, first.found_hash
                )?;
                if mismatches.len() > 1 {
                    write!(f, " (y {} entradas divergentes más)", mismatches.len() - 1)?;
                }
                write!(f, "; {} entradas verificadas", total_verified)
            }
            ChainVerdict::Inconsistent { reason, .. } => match reason {
                Inconsistency::InvalidWithoutMismatches => write!(
                    f,
                    "Respuesta de verificación inconsistente: la cadena se reporta inválida sin indicar entradas divergentes"
                ),
                Inconsistency::ValidWithMismatches => write!(
                    f,
                    "Respuesta de verificación inconsistente: la cadena se reporta válida pero lista entradas divergentes"
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mismatch(id: &str, expected: &str, found: &str) -> HashMismatch {
        HashMismatch {
            id: id.to_string(),
            expected_hash: expected.to_string(),
            found_hash: found.to_string(),
        }
    }

    #[test]
    fn test_broken_chain_names_divergent_entry() {
        let json = r#"{"valid": false, "totalVerified": 41, "mismatches": [{"id": "e42", "expectedHash": "a1", "foundHash": "b2"}]}"#;
        let report: VerificationReport =
            serde_json::from_str(json).expect("Failed to parse report test JSON");
        let verdict = ChainVerdict::from_report(report);

        assert_eq!(verdict.first_divergence(), Some(&mismatch("e42", "a1", "b2")));
        let rendered = verdict.to_string();
        assert!(rendered.contains("e42"));
        assert!(rendered.contains("a1"));
        assert!(rendered.contains("b2"));
    }

    #[test]
    fn test_parse_wire_names() {
        let json = r#"{"valido": true, "totalVerificados": 120, "errores": []}"#;
        let report: VerificationReport =
            serde_json::from_str(json).expect("Failed to parse report test JSON");
        assert_eq!(
            ChainVerdict::from_report(report),
            ChainVerdict::Intact { total_verified: 120 }
        );
    }

    #[test]
    fn test_invalid_without_mismatches_is_inconsistent() {
        let report = VerificationReport {
            valid: false,
            total_verified: 10,
            mismatches: vec![],
        };
        let verdict = ChainVerdict::from_report(report);
        assert!(matches!(
            verdict,
            ChainVerdict::Inconsistent {
                reason: Inconsistency::InvalidWithoutMismatches,
                ..
            }
        ));
        assert!(!verdict.is_intact());
        assert!(verdict.first_divergence().is_none());
    }

    #[test]
    fn test_valid_with_mismatches_is_inconsistent() {
        let report = VerificationReport {
            valid: true,
            total_verified: 10,
            mismatches: vec![mismatch("e1", "x", "y")],
        };
        assert!(matches!(
            ChainVerdict::from_report(report),
            ChainVerdict::Inconsistent {
                reason: Inconsistency::ValidWithMismatches,
                ..
            }
        ));
    }

    #[test]
    fn test_broken_display_counts_further_mismatches() {
        let verdict = ChainVerdict::from_report(VerificationReport {
            valid: false,
            total_verified: 50,
            mismatches: vec![mismatch("e7", "a", "b"), mismatch("e8", "c", "d")],
        });
        let rendered = verdict.to_string();
        assert!(rendered.contains("e7"));
        assert!(rendered.contains("1 entradas divergentes más"));
    }

    #[test]
    fn test_parse_audit_entry() {
        let json = r#"{
            "id": "e1",
            "secuencia": 0,
            "hashActual": "h0",
            "hashAnterior": null,
            "accion": "LOGIN",
            "entidad": "auth",
            "entidadId": "1",
            "usuarioId": "1",
            "usuarioNombre": "admin",
            "sucursalId": null,
            "sucursalNombre": null,
            "pagina": null,
            "componente": null,
            "ipAddress": "10.0.0.1",
            "userAgent": null,
            "valorAnterior": null,
            "valorNuevo": {"ok": true},
            "metadata": null,
            "creadoEn": 1700000000
        }"#;
        let entry: AuditEntry = serde_json::from_str(json).expect("Failed to parse entry test JSON");
        assert!(entry.is_genesis());
        assert_eq!(entry.action, AuditAction::Login);
        assert!(entry.previous_hash.is_none());
        assert_eq!(entry.created_at_utc().map(|d| d.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn test_unknown_action_kind_is_preserved_as_other() {
        let action: AuditAction = serde_json::from_str(r#""ARCHIVE""#).unwrap();
        assert_eq!(action, AuditAction::Other);
    }

    #[test]
    fn test_list_params_omit_unset_fields() {
        let params = ListAuditParams {
            limit: Some(20),
            action: Some(AuditAction::LoginFailed),
            ..Default::default()
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value, serde_json::json!({"limit": 20, "accion": "LOGIN_FAILED"}));
    }
}
