//! MongoDB-backed attestation store

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use tracing::debug;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    AuditDoc, AuditKind, ConfirmationStatus, GradeDoc, GradeStatus, LedgerTxDoc, TxResolution,
    AUDIT_COLLECTION, GRADE_COLLECTION, LEDGER_TX_COLLECTION,
};
use crate::db::store::AttestationStore;
use crate::types::Result;

pub struct MongoStore {
    grades: MongoCollection<GradeDoc>,
    txs: MongoCollection<LedgerTxDoc>,
    audit: MongoCollection<AuditDoc>,
}

impl MongoStore {
    /// Open the three collections, applying their indexes
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            grades: client.collection(GRADE_COLLECTION).await?,
            txs: client.collection(LEDGER_TX_COLLECTION).await?,
            audit: client.collection(AUDIT_COLLECTION).await?,
        })
    }
}

fn to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl AttestationStore for MongoStore {
    async fn insert_grade(&self, grade: GradeDoc) -> Result<()> {
        self.grades.insert_one(grade).await
    }

    async fn get_grade(&self, id: &str) -> Result<Option<GradeDoc>> {
        self.grades.find_one(doc! { "_id": id }).await
    }

    async fn update_score(&self, id: &str, score: u8) -> Result<bool> {
        let result = self
            .grades
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$set": {
                        "score": score as i32,
                        "status": GradeStatus::Pending.as_str(),
                        "metadata.updated_at": DateTime::now(),
                    },
                    "$unset": { "blockchain_grade_id": "", "transaction_hash": "" },
                },
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn set_attestation(
        &self,
        id: &str,
        transaction_hash: &str,
        blockchain_grade_id: Option<&str>,
    ) -> Result<bool> {
        let update = match blockchain_grade_id {
            Some(ledger_id) => doc! {
                "$set": {
                    "transaction_hash": transaction_hash,
                    "blockchain_grade_id": ledger_id,
                    "metadata.updated_at": DateTime::now(),
                },
            },
            None => doc! {
                "$set": {
                    "transaction_hash": transaction_hash,
                    "metadata.updated_at": DateTime::now(),
                },
                "$unset": { "blockchain_grade_id": "" },
            },
        };
        let result = self.grades.update_one(doc! { "_id": id }, update).await?;
        Ok(result.matched_count == 1)
    }

    async fn transition_status(
        &self,
        id: &str,
        from: GradeStatus,
        to: GradeStatus,
    ) -> Result<bool> {
        let result = self
            .grades
            .update_one(
                doc! { "_id": id, "status": from.as_str() },
                doc! {
                    "$set": {
                        "status": to.as_str(),
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?;
        debug!(grade_id = %id, from = from.as_str(), to = to.as_str(), modified = result.modified_count, "Grade status transition");
        Ok(result.modified_count == 1)
    }

    async fn insert_tx(&self, record: LedgerTxDoc) -> Result<()> {
        self.txs.insert_one(record).await
    }

    async fn get_tx(&self, transaction_hash: &str) -> Result<Option<LedgerTxDoc>> {
        self.txs
            .find_one(doc! { "transaction_hash": transaction_hash })
            .await
    }

    async fn list_txs_for_grade(&self, grade_id: &str) -> Result<Vec<LedgerTxDoc>> {
        self.txs
            .find_sorted(doc! { "grade_id": grade_id }, doc! { "submitted_at": 1 }, 0)
            .await
    }

    async fn resolve_tx(&self, transaction_hash: &str, resolution: TxResolution) -> Result<bool> {
        let now = DateTime::now();
        let mut set: Document = doc! {
            "status": resolution.status.as_str(),
            "metadata.updated_at": now,
        };
        if let Some(block) = resolution.block_number {
            set.insert("block_number", block as i64);
        }
        if let Some(ledger_id) = resolution.blockchain_grade_id {
            set.insert("blockchain_grade_id", ledger_id);
        }
        if resolution.status == ConfirmationStatus::Confirmed {
            set.insert("confirmed_at", now);
        }

        let result = self
            .txs
            .update_one(
                doc! {
                    "transaction_hash": transaction_hash,
                    "status": ConfirmationStatus::Pending.as_str(),
                },
                doc! { "$set": set },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn pending_real_txs(&self, limit: usize) -> Result<Vec<LedgerTxDoc>> {
        self.txs
            .find_sorted(
                doc! {
                    "status": ConfirmationStatus::Pending.as_str(),
                    "simulated": false,
                    "block_number": null,
                },
                doc! { "submitted_at": 1 },
                to_i64(limit),
            )
            .await
    }

    async fn append_audit(&self, entry: AuditDoc) -> Result<()> {
        self.audit.insert_one(entry).await
    }

    async fn list_audit(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditDoc>> {
        let filter = match kind {
            Some(kind) => doc! { "kind": kind.as_str() },
            None => doc! {},
        };
        self.audit
            .find_sorted(filter, doc! { "created_at": -1 }, to_i64(limit))
            .await
    }

    async fn latest_audit_since(
        &self,
        kind: AuditKind,
        since: DateTime,
    ) -> Result<Option<AuditDoc>> {
        let mut found = self
            .audit
            .find_sorted(
                doc! { "kind": kind.as_str(), "created_at": { "$gte": since } },
                doc! { "created_at": -1 },
                1,
            )
            .await?;
        Ok(found.pop())
    }
}
