//! Data-access handle for the attestation services
//!
//! Constructed once at startup and passed to every service as
//! `Arc<dyn AttestationStore>`.

use async_trait::async_trait;
use bson::DateTime;

use crate::db::schemas::{AuditDoc, AuditKind, GradeDoc, GradeStatus, LedgerTxDoc, TxResolution};
use crate::types::Result;

#[async_trait]
pub trait AttestationStore: Send + Sync {
    // Grades

    async fn insert_grade(&self, grade: GradeDoc) -> Result<()>;

    async fn get_grade(&self, id: &str) -> Result<Option<GradeDoc>>;

    /// Replace the score, reset status to `PENDING` and clear the current
    /// attestation. Returns false if the grade does not exist.
    async fn update_score(&self, id: &str, score: u8) -> Result<bool>;

    /// Link the grade to its current ledger record
    async fn set_attestation(
        &self,
        id: &str,
        transaction_hash: &str,
        blockchain_grade_id: Option<&str>,
    ) -> Result<bool>;

    /// Move a grade from `from` to `to` only if it is still in `from`.
    /// Returns false when another writer got there first.
    async fn transition_status(&self, id: &str, from: GradeStatus, to: GradeStatus)
        -> Result<bool>;

    // Ledger transaction records

    async fn insert_tx(&self, record: LedgerTxDoc) -> Result<()>;

    async fn get_tx(&self, transaction_hash: &str) -> Result<Option<LedgerTxDoc>>;

    /// Records for a grade, oldest first
    async fn list_txs_for_grade(&self, grade_id: &str) -> Result<Vec<LedgerTxDoc>>;

    /// Apply a confirmation outcome. Only `PENDING` records change; returns
    /// whether this call changed the record.
    async fn resolve_tx(&self, transaction_hash: &str, resolution: TxResolution) -> Result<bool>;

    /// Real (non-simulated) `PENDING` records with no block number yet,
    /// oldest first. Records included without an event keep their block
    /// number and are not returned.
    async fn pending_real_txs(&self, limit: usize) -> Result<Vec<LedgerTxDoc>>;

    // Audit log

    async fn append_audit(&self, entry: AuditDoc) -> Result<()>;

    /// Newest first, optionally restricted to one kind
    async fn list_audit(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditDoc>>;

    /// Newest entry of `kind` created at or after `since`
    async fn latest_audit_since(&self, kind: AuditKind, since: DateTime)
        -> Result<Option<AuditDoc>>;
}
