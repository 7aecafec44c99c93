//! grade-attest - grade attestation gateway
//!
//! Anchors grade records to an Ethereum-compatible ledger and verifies them
//! later. When the ledger is unreachable or cannot run the grade contract,
//! operations fall back to an in-process simulation that produces
//! identically shaped identifiers.
//!
//! ## Components
//!
//! - **Connection manager**: ledger settings, client, liveness and mode flags
//! - **Mode selector**: real-versus-simulated routing with compatibility fallback
//! - **Submitter**: validated grade writes with a transaction record per submission
//! - **Verifier**: lookup and field-by-field comparison of stored records
//! - **Audit log**: durable trail of submissions, verifications and downgrades
//! - **Confirmations**: background resolution of pending transactions

pub mod auth;
pub mod config;
pub mod db;
pub mod ledger;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AttestError, Result};
