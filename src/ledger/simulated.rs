//! Simulated ledger
//!
//! Stands in for the node when it is unreachable, incompatible, or mock mode
//! is forced. Identifiers have the same shape as real ones (`0x` + 64 hex
//! transaction hashes, 64 hex grade ids) and are derived from the record
//! content plus a sequence number, so a given submission history always
//! yields the same identifiers.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Broadcast, GradeEntry, Inclusion, LedgerClient, LedgerError, LedgerMode, StoredGrade};

/// Block height the simulated chain starts counting from
const SIMULATED_GENESIS_BLOCK: u64 = 1;

pub struct SimulatedLedger {
    /// grade id -> stored record
    records: DashMap<String, StoredGrade>,
    /// transaction hash -> inclusion
    receipts: DashMap<String, Inclusion>,
    sequence: AtomicU64,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            receipts: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Whether this identifier was minted by the simulation
    pub fn contains(&self, grade_id: &str) -> bool {
        super::normalize_grade_id(grade_id)
            .map(|id| self.records.contains_key(&id))
            .unwrap_or(false)
    }

    /// Number of simulated records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn derive_grade_id(entry: &GradeEntry, sequence: u64) -> String {
        let mut hasher = Sha256::new();
        for field in [
            entry.student_id.as_str(),
            entry.course_id.as_str(),
            entry.semester.as_str(),
            entry.teacher_id.as_str(),
            entry.metadata.as_str(),
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([entry.score]);
        hasher.update(sequence.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    fn derive_tx_hash(grade_id: &str, sequence: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"simulated-tx");
        hasher.update(grade_id.as_bytes());
        hasher.update(sequence.to_be_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    fn mode(&self) -> LedgerMode {
        LedgerMode::Simulated
    }

    async fn probe(&self) -> Result<u64, LedgerError> {
        Ok(SIMULATED_GENESIS_BLOCK + self.sequence.load(Ordering::SeqCst))
    }

    async fn broadcast_grade(&self, entry: &GradeEntry) -> Result<Broadcast, LedgerError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let grade_id = Self::derive_grade_id(entry, sequence);
        let tx_hash = Self::derive_tx_hash(&grade_id, sequence);

        self.records.insert(
            grade_id.clone(),
            StoredGrade {
                student_id: entry.student_id.clone(),
                course_id: entry.course_id.clone(),
                score: entry.score as u64,
                semester: entry.semester.clone(),
                teacher_id: entry.teacher_id.clone(),
                metadata: entry.metadata.clone(),
                timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            },
        );
        self.receipts.insert(
            tx_hash.clone(),
            Inclusion {
                tx_hash: tx_hash.clone(),
                block_number: SIMULATED_GENESIS_BLOCK + sequence,
                grade_id: Some(grade_id),
                succeeded: true,
            },
        );

        Ok(Broadcast { tx_hash })
    }

    async fn await_inclusion(&self, tx_hash: &str) -> Result<Inclusion, LedgerError> {
        self.transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| LedgerError::Rpc(format!("unknown simulated transaction {}", tx_hash)))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Inclusion>, LedgerError> {
        Ok(self
            .receipts
            .get(&tx_hash.to_ascii_lowercase())
            .map(|r| r.value().clone()))
    }

    async fn get_grade(&self, grade_id: &str) -> Result<Option<StoredGrade>, LedgerError> {
        Ok(super::normalize_grade_id(grade_id)
            .and_then(|id| self.records.get(&id).map(|r| r.value().clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(score: u8) -> GradeEntry {
        GradeEntry {
            student_id: "s1".into(),
            course_id: "c1".into(),
            score,
            semester: "2024-1".into(),
            teacher_id: "t1".into(),
            metadata: "{}".into(),
        }
    }

    #[tokio::test]
    async fn test_identifier_shape() {
        let ledger = SimulatedLedger::new();
        let broadcast = ledger.broadcast_grade(&entry(85)).await.unwrap();

        assert!(broadcast.tx_hash.starts_with("0x"));
        assert_eq!(broadcast.tx_hash.len(), 66);

        let inclusion = ledger.await_inclusion(&broadcast.tx_hash).await.unwrap();
        let grade_id = inclusion.grade_id.unwrap();
        assert_eq!(grade_id.len(), 64);
        assert!(grade_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(inclusion.succeeded);
    }

    #[tokio::test]
    async fn test_same_history_same_identifiers() {
        let a = SimulatedLedger::new();
        let b = SimulatedLedger::new();
        for score in [10, 20, 30] {
            let ta = a.broadcast_grade(&entry(score)).await.unwrap();
            let tb = b.broadcast_grade(&entry(score)).await.unwrap();
            assert_eq!(ta, tb);
        }
    }

    #[tokio::test]
    async fn test_resubmission_yields_new_record() {
        let ledger = SimulatedLedger::new();
        let first = ledger.broadcast_grade(&entry(70)).await.unwrap();
        let second = ledger.broadcast_grade(&entry(70)).await.unwrap();
        assert_ne!(first.tx_hash, second.tx_hash);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_round_trip() {
        let ledger = SimulatedLedger::new();
        let broadcast = ledger.broadcast_grade(&entry(99)).await.unwrap();
        let grade_id = ledger
            .await_inclusion(&broadcast.tx_hash)
            .await
            .unwrap()
            .grade_id
            .unwrap();

        let stored = ledger.get_grade(&grade_id).await.unwrap().unwrap();
        assert_eq!(stored.score, 99);
        assert!(ledger.contains(&format!("0x{}", grade_id)));
        assert!(ledger.get_grade(&"00".repeat(32)).await.unwrap().is_none());
    }
}
