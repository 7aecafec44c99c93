//! Ledger client abstraction
//!
//! One `LedgerClient` capability with two variants:
//! - `RpcLedgerClient` talks JSON-RPC to a real node and the deployed grade contract
//! - `SimulatedLedger` keeps records in process with identically shaped identifiers
//!
//! The mode selector picks a variant once per call; callers never branch on
//! a mock flag themselves.

pub mod abi;
pub mod rpc;
pub mod signer;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use rpc::RpcLedgerClient;
pub use signer::{LegacyTransaction, LocalSigner};
pub use simulated::SimulatedLedger;

/// Which ledger variant produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    Real,
    Simulated,
}

impl LedgerMode {
    pub fn is_simulated(self) -> bool {
        matches!(self, LedgerMode::Simulated)
    }
}

/// Errors raised by ledger clients.
///
/// Availability classes (`ConnectionUnavailable`, `Timeout`, `Compatibility`)
/// are recovered by falling back to simulation; the rest are hard failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger node unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Ledger call timed out: {0}")]
    Timeout(String),

    #[error("Ledger incompatible with contract: {0}")]
    Compatibility(String),

    #[error("Insufficient funds: {0}")]
    InsufficientResources(String),

    #[error("Ledger RPC error: {0}")]
    Rpc(String),

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("Failed to decode ledger response: {0}")]
    Decode(String),

    #[error("Ledger not configured: {0}")]
    NotConfigured(String),
}

impl LedgerError {
    /// Whether a simulated fallback may stand in for this failure
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            LedgerError::ConnectionUnavailable(_)
                | LedgerError::Timeout(_)
                | LedgerError::Compatibility(_)
        )
    }

    /// Raw message as reported by the node or transport
    pub fn raw_message(&self) -> &str {
        match self {
            LedgerError::ConnectionUnavailable(m)
            | LedgerError::Timeout(m)
            | LedgerError::Compatibility(m)
            | LedgerError::InsufficientResources(m)
            | LedgerError::Rpc(m)
            | LedgerError::Reverted(m)
            | LedgerError::Decode(m)
            | LedgerError::NotConfigured(m) => m,
        }
    }
}

/// The record written to the grade contract, in ABI field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub student_id: String,
    pub course_id: String,
    pub score: u8,
    pub semester: String,
    pub teacher_id: String,
    pub metadata: String,
}

/// A transaction accepted by the node (or the simulation)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub tx_hash: String,
}

/// Inclusion of a transaction in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    pub tx_hash: String,
    pub block_number: u64,
    /// Identifier from the `GradeAdded` event, if the event was emitted
    pub grade_id: Option<String>,
    /// Receipt status; false when the transaction reverted on inclusion
    pub succeeded: bool,
}

/// A grade record as stored on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredGrade {
    pub student_id: String,
    pub course_id: String,
    pub score: u64,
    pub semester: String,
    pub teacher_id: String,
    pub metadata: String,
    pub timestamp: u64,
}

/// Capability shared by the real and simulated ledgers.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Which variant this is
    fn mode(&self) -> LedgerMode;

    /// Lightweight liveness check; returns the latest block number
    async fn probe(&self) -> Result<u64, LedgerError>;

    /// Estimate, sign and send a grade write; returns once the node accepted it
    async fn broadcast_grade(&self, entry: &GradeEntry) -> Result<Broadcast, LedgerError>;

    /// Wait until the transaction is included. Unbounded; callers apply a timeout.
    async fn await_inclusion(&self, tx_hash: &str) -> Result<Inclusion, LedgerError>;

    /// Current receipt, or `None` while the transaction is not yet included
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Inclusion>, LedgerError>;

    /// Stored record for a grade identifier, or `None` if there is none
    async fn get_grade(&self, grade_id: &str) -> Result<Option<StoredGrade>, LedgerError>;
}

/// Normalize a 32-byte identifier to 64 lowercase hex characters
pub fn normalize_grade_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex_part.to_ascii_lowercase())
    } else {
        None
    }
}
