//! Ledger transaction record schema
//!
//! One document per submission attempt that reached a ledger (real or
//! simulated). Updated once when confirmation is observed, immutable after.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for ledger transaction records
pub const LEDGER_TX_COLLECTION: &str = "ledger_transactions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfirmationStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "PENDING",
            ConfirmationStatus::Confirmed => "CONFIRMED",
            ConfirmationStatus::Failed => "FAILED",
        }
    }
}

/// Ledger transaction document
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LedgerTxDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Grade this transaction attests, if submitted for a stored grade
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_id: Option<String>,

    pub transaction_hash: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,

    /// Identifier emitted by the contract; absent until observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_grade_id: Option<String>,

    pub status: ConfirmationStatus,

    /// Produced by the simulated ledger rather than a real node
    pub simulated: bool,

    pub submitted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime>,
}

impl LedgerTxDoc {
    pub fn new(transaction_hash: impl Into<String>, simulated: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            grade_id: None,
            transaction_hash: transaction_hash.into(),
            block_number: None,
            blockchain_grade_id: None,
            status: ConfirmationStatus::Pending,
            simulated,
            submitted_at: Some(DateTime::now()),
            confirmed_at: None,
        }
    }
}

/// Outcome of a confirmation check, applied only to `PENDING` records
#[derive(Debug, Clone, PartialEq)]
pub struct TxResolution {
    pub status: ConfirmationStatus,
    pub block_number: Option<u64>,
    pub blockchain_grade_id: Option<String>,
}

impl IntoIndexes for LedgerTxDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "transaction_hash": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("transaction_hash_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "grade_id": 1 },
                Some(IndexOptions::builder().name("grade_id_index".to_string()).build()),
            ),
            (
                doc! { "status": 1, "simulated": 1 },
                Some(IndexOptions::builder().name("status_simulated".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for LedgerTxDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
