//! Attestation services
//!
//! - `connection`: ledger link health and the swappable settings snapshot
//! - `mode`: real versus simulated routing per call
//! - `submitter`: grade writes
//! - `verifier`: ledger record checks
//! - `audit`: append-only interaction log
//! - `confirmation`: background resolution of pending transactions
//! - `grades`: grade-level attestation workflow

pub mod audit;
pub mod confirmation;
pub mod connection;
pub mod grades;
pub mod mode;
pub mod submitter;
pub mod verifier;

pub use audit::{Actor, AuditLog};
pub use confirmation::{spawn_confirmation_task, ConfirmationTracker, SweepReport};
pub use connection::{
    rpc_client_factory, ClientFactory, ConnectionManager, ConnectionState, ConnectionStatus,
};
pub use grades::{GradeVerification, GradeView, GradeWorkflow, NewGrade, ScoreEdit};
pub use mode::{CompatibilitySignatures, FallbackReason, ModeSelector, Routed};
pub use submitter::{GradeSubmission, LedgerResult, TransactionSubmitter};
pub use verifier::{ExpectedGrade, RecordVerifier, VerificationResult};
