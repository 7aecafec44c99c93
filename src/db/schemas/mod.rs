//! Database schemas for the attestation gateway
//!
//! Document structures for grades, ledger transaction records, and the
//! ledger audit log.

mod audit;
mod grade;
mod ledger_tx;
mod metadata;

pub use audit::{action_label, AuditDoc, AuditKind, AuditOutcome, AUDIT_COLLECTION};
pub use grade::{GradeDoc, GradeStatus, GRADE_COLLECTION};
pub use ledger_tx::{ConfirmationStatus, LedgerTxDoc, TxResolution, LEDGER_TX_COLLECTION};
pub use metadata::Metadata;
