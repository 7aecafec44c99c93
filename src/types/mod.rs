//! Shared types for the attestation gateway

pub mod error;

pub use error::{AttestError, Result};
