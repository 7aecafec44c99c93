//! Ledger audit log schema
//!
//! Append-only. Each entry carries the shape the system-log viewer reads
//! (`user_id`, `action`, `details`, `ip_address`, `created_at`) plus typed
//! `kind`/`outcome` columns for querying.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for audit entries
pub const AUDIT_COLLECTION: &str = "audit_logs";

/// Which ledger interaction an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Submit,
    Verify,
    Connect,
    CompatDowngrade,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::Submit => "SUBMIT",
            AuditKind::Verify => "VERIFY",
            AuditKind::Connect => "CONNECT",
            AuditKind::CompatDowngrade => "COMPAT_DOWNGRADE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Ok,
    Simulated,
    Error,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Ok => "OK",
            AuditOutcome::Simulated => "SIMULATED",
            AuditOutcome::Error => "ERROR",
        }
    }
}

/// Human-readable action label, e.g. `BLOCKCHAIN_SUBMIT_SIMULATED`
pub fn action_label(kind: AuditKind, outcome: AuditOutcome) -> String {
    format!("BLOCKCHAIN_{}_{}", kind.as_str(), outcome.as_str())
}

/// Audit entry document
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuditDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub action: String,

    /// Free text; may contain raw node error messages
    pub details: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    pub created_at: DateTime,

    pub kind: AuditKind,
    pub outcome: AuditOutcome,
}

impl AuditDoc {
    pub fn new(kind: AuditKind, outcome: AuditOutcome, details: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            user_id: None,
            action: action_label(kind, outcome),
            details: details.into(),
            ip_address: None,
            created_at: DateTime::now(),
            kind,
            outcome,
        }
    }

    pub fn with_actor(mut self, user_id: Option<String>, ip_address: Option<String>) -> Self {
        self.user_id = user_id;
        self.ip_address = ip_address;
        self
    }
}

impl IntoIndexes for AuditDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "created_at": -1 },
                Some(IndexOptions::builder().name("created_at_desc".to_string()).build()),
            ),
            (
                doc! { "kind": 1, "created_at": -1 },
                Some(IndexOptions::builder().name("kind_created_at".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for AuditDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_label() {
        assert_eq!(
            action_label(AuditKind::Submit, AuditOutcome::Simulated),
            "BLOCKCHAIN_SUBMIT_SIMULATED"
        );
        assert_eq!(
            action_label(AuditKind::CompatDowngrade, AuditOutcome::Simulated),
            "BLOCKCHAIN_COMPAT_DOWNGRADE_SIMULATED"
        );
    }

    #[test]
    fn test_kind_serializes_screaming() {
        let json = serde_json::to_string(&AuditKind::CompatDowngrade).unwrap();
        assert_eq!(json, "\"COMPAT_DOWNGRADE\"");
    }
}
