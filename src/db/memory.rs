//! In-process store
//!
//! Used in dev mode when MongoDB is unreachable, and by tests.

use async_trait::async_trait;
use bson::DateTime;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::db::schemas::{
    AuditDoc, AuditKind, ConfirmationStatus, GradeDoc, GradeStatus, LedgerTxDoc, TxResolution,
};
use crate::db::store::AttestationStore;
use crate::types::{AttestError, Result};

/// Maximum audit entries retained before pruning.
const MAX_AUDIT_ENTRIES: usize = 10_000;

pub struct MemoryStore {
    grades: Arc<RwLock<HashMap<String, GradeDoc>>>,
    /// Insertion order
    txs: Arc<RwLock<Vec<LedgerTxDoc>>>,
    /// Newest first
    audit: Arc<RwLock<VecDeque<AuditDoc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            grades: Arc::new(RwLock::new(HashMap::new())),
            txs: Arc::new(RwLock::new(Vec::new())),
            audit: Arc::new(RwLock::new(VecDeque::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttestationStore for MemoryStore {
    async fn insert_grade(&self, grade: GradeDoc) -> Result<()> {
        let mut grades = self.grades.write().await;
        if grades.contains_key(&grade.id) {
            return Err(AttestError::Conflict(format!("Grade {} already exists", grade.id)));
        }
        grades.insert(grade.id.clone(), grade);
        Ok(())
    }

    async fn get_grade(&self, id: &str) -> Result<Option<GradeDoc>> {
        Ok(self.grades.read().await.get(id).cloned())
    }

    async fn update_score(&self, id: &str, score: u8) -> Result<bool> {
        let mut grades = self.grades.write().await;
        let Some(grade) = grades.get_mut(id) else {
            return Ok(false);
        };
        grade.score = score;
        grade.status = GradeStatus::Pending;
        grade.blockchain_grade_id = None;
        grade.transaction_hash = None;
        grade.metadata.touch();
        Ok(true)
    }

    async fn set_attestation(
        &self,
        id: &str,
        transaction_hash: &str,
        blockchain_grade_id: Option<&str>,
    ) -> Result<bool> {
        let mut grades = self.grades.write().await;
        let Some(grade) = grades.get_mut(id) else {
            return Ok(false);
        };
        grade.transaction_hash = Some(transaction_hash.to_string());
        grade.blockchain_grade_id = blockchain_grade_id.map(str::to_string);
        grade.metadata.touch();
        Ok(true)
    }

    async fn transition_status(
        &self,
        id: &str,
        from: GradeStatus,
        to: GradeStatus,
    ) -> Result<bool> {
        let mut grades = self.grades.write().await;
        match grades.get_mut(id) {
            Some(grade) if grade.status == from => {
                grade.status = to;
                grade.metadata.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_tx(&self, record: LedgerTxDoc) -> Result<()> {
        let mut txs = self.txs.write().await;
        if txs
            .iter()
            .any(|t| t.transaction_hash == record.transaction_hash)
        {
            return Err(AttestError::Conflict(format!(
                "Transaction {} already recorded",
                record.transaction_hash
            )));
        }
        txs.push(record);
        Ok(())
    }

    async fn get_tx(&self, transaction_hash: &str) -> Result<Option<LedgerTxDoc>> {
        Ok(self
            .txs
            .read()
            .await
            .iter()
            .find(|t| t.transaction_hash == transaction_hash)
            .cloned())
    }

    async fn list_txs_for_grade(&self, grade_id: &str) -> Result<Vec<LedgerTxDoc>> {
        Ok(self
            .txs
            .read()
            .await
            .iter()
            .filter(|t| t.grade_id.as_deref() == Some(grade_id))
            .cloned()
            .collect())
    }

    async fn resolve_tx(&self, transaction_hash: &str, resolution: TxResolution) -> Result<bool> {
        let mut txs = self.txs.write().await;
        let Some(record) = txs
            .iter_mut()
            .find(|t| t.transaction_hash == transaction_hash)
        else {
            return Ok(false);
        };
        if record.status != ConfirmationStatus::Pending {
            return Ok(false);
        }

        record.status = resolution.status;
        if resolution.block_number.is_some() {
            record.block_number = resolution.block_number;
        }
        if resolution.blockchain_grade_id.is_some() {
            record.blockchain_grade_id = resolution.blockchain_grade_id;
        }
        if resolution.status == ConfirmationStatus::Confirmed {
            record.confirmed_at = Some(DateTime::now());
        }
        record.metadata.touch();
        Ok(true)
    }

    async fn pending_real_txs(&self, limit: usize) -> Result<Vec<LedgerTxDoc>> {
        Ok(self
            .txs
            .read()
            .await
            .iter()
            .filter(|t| {
                !t.simulated
                    && t.status == ConfirmationStatus::Pending
                    && t.block_number.is_none()
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_audit(&self, entry: AuditDoc) -> Result<()> {
        let mut audit = self.audit.write().await;
        audit.push_front(entry);
        if audit.len() > MAX_AUDIT_ENTRIES {
            let dropped = audit.len() - MAX_AUDIT_ENTRIES;
            audit.truncate(MAX_AUDIT_ENTRIES);
            warn!(
                dropped,
                retained = MAX_AUDIT_ENTRIES,
                "In-memory audit log full, dropping oldest entries"
            );
        }
        Ok(())
    }

    async fn list_audit(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditDoc>> {
        Ok(self
            .audit
            .read()
            .await
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_audit_since(
        &self,
        kind: AuditKind,
        since: DateTime,
    ) -> Result<Option<AuditDoc>> {
        Ok(self
            .audit
            .read()
            .await
            .iter()
            .find(|e| e.kind == kind && e.created_at >= since)
            .cloned())
    }
}
