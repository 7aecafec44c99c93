//! Mode selector
//!
//! Picks the real or simulated ledger for each call:
//! 1. forced mock mode: simulation, no network at all
//! 2. node unreachable: simulation
//! 3. otherwise the real client, falling back to simulation for this call
//!    when it fails with a connectivity, timeout or recognised
//!    incompatibility error
//!
//! Anything else from the real path is returned to the caller.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::db::schemas::{AuditKind, AuditOutcome};
use crate::ledger::{LedgerClient, LedgerError, LedgerMode};
use crate::services::audit::{Actor, AuditLog};
use crate::services::connection::ConnectionManager;

/// Node error fragments that identify an incompatible node, matched
/// case-insensitively as substrings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilitySignatures(Vec<String>);

impl CompatibilitySignatures {
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            signatures
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// The signature contained in `message`, if any
    pub fn matching(&self, message: &str) -> Option<&str> {
        let lowered = message.to_ascii_lowercase();
        self.0
            .iter()
            .find(|sig| lowered.contains(sig.as_str()))
            .map(String::as_str)
    }

    /// Reclassify node errors whose message carries a signature
    pub fn classify(&self, err: LedgerError) -> LedgerError {
        match err {
            LedgerError::Rpc(msg) | LedgerError::Reverted(msg)
                if self.matching(&msg).is_some() =>
            {
                LedgerError::Compatibility(msg)
            }
            other => other,
        }
    }
}

/// Why a call ran against the simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Forced,
    Disconnected(String),
    Unavailable(String),
    Timeout(String),
    Compatibility(String),
}

impl FallbackReason {
    pub fn label(&self) -> &'static str {
        match self {
            FallbackReason::Forced => "forced",
            FallbackReason::Disconnected(_) => "disconnected",
            FallbackReason::Unavailable(_) => "unavailable",
            FallbackReason::Timeout(_) => "timeout",
            FallbackReason::Compatibility(_) => "compatibility",
        }
    }
}

/// A value together with the ledger variant that produced it
#[derive(Debug, Clone)]
pub struct Routed<T> {
    pub value: T,
    pub mode: LedgerMode,
    pub fallback: Option<FallbackReason>,
}

pub struct ModeSelector {
    connection: Arc<ConnectionManager>,
    audit: Arc<AuditLog>,
}

impl ModeSelector {
    pub fn new(connection: Arc<ConnectionManager>, audit: Arc<AuditLog>) -> Self {
        Self { connection, audit }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Run `op` against the ledger chosen for this call.
    ///
    /// `op` may be invoked twice: once on the real client and, after a
    /// recoverable failure, once on the simulation. It must apply its own
    /// timeouts.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        actor: &Actor,
        op: F,
    ) -> Result<Routed<T>, LedgerError>
    where
        F: Fn(Arc<dyn LedgerClient>) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let snap = self.connection.snapshot().await;
        if snap.state.mock_mode {
            debug!(operation = operation, "Mock mode forced, using simulated ledger");
            return self.simulate(&op, FallbackReason::Forced).await;
        }

        if !self.connection.check_connection().await {
            let reason = self
                .connection
                .state()
                .await
                .last_error
                .unwrap_or_else(|| "ledger unreachable".to_string());
            warn!(operation = operation, reason = %reason, "Ledger unreachable, degrading to simulated ledger");
            return self
                .simulate(&op, FallbackReason::Disconnected(reason))
                .await;
        }

        // The probe may have raced a reload; take the client it validated.
        let snap = self.connection.snapshot().await;
        let Some(client) = snap.client.clone() else {
            return self
                .simulate(
                    &op,
                    FallbackReason::Disconnected("ledger client unavailable".to_string()),
                )
                .await;
        };

        let signatures = CompatibilitySignatures::new(&snap.settings.compat_signatures);
        let err = match op(client).await {
            Ok(value) => {
                return Ok(Routed {
                    value,
                    mode: LedgerMode::Real,
                    fallback: None,
                })
            }
            Err(err) => signatures.classify(err),
        };

        match err {
            LedgerError::Compatibility(raw) => {
                error!(operation = operation, raw_error = %raw, "Ledger incompatible with contract, falling back to simulation");
                self.audit
                    .record(
                        AuditKind::CompatDowngrade,
                        AuditOutcome::Simulated,
                        format!("{}: {}", operation, raw),
                        actor,
                    )
                    .await;
                self.connection.degrade(&raw).await;
                self.simulate(&op, FallbackReason::Compatibility(raw)).await
            }
            LedgerError::ConnectionUnavailable(raw) => {
                warn!(operation = operation, raw_error = %raw, "Ledger connection lost, falling back to simulation");
                self.simulate(&op, FallbackReason::Unavailable(raw)).await
            }
            LedgerError::Timeout(raw) => {
                warn!(operation = operation, raw_error = %raw, "Ledger call timed out, falling back to simulation");
                self.simulate(&op, FallbackReason::Timeout(raw)).await
            }
            other => {
                error!(operation = operation, error = %other, "Ledger call failed");
                Err(other)
            }
        }
    }

    async fn simulate<T, F, Fut>(&self, op: &F, reason: FallbackReason) -> Result<Routed<T>, LedgerError>
    where
        F: Fn(Arc<dyn LedgerClient>) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let simulated: Arc<dyn LedgerClient> = self.connection.simulated();
        let value = op(simulated).await?;
        Ok(Routed {
            value,
            mode: LedgerMode::Simulated,
            fallback: Some(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_match_is_case_insensitive() {
        let sigs = CompatibilitySignatures::new(["Invalid Opcode"]);
        assert_eq!(
            sigs.matching("VM Exception: invalid opcode: MCOPY"),
            Some("invalid opcode")
        );
        assert_eq!(sigs.matching("nonce too low"), None);
    }

    #[test]
    fn test_classify_only_node_errors() {
        let sigs = CompatibilitySignatures::new(["invalid opcode", "PUSH0"]);

        assert!(matches!(
            sigs.classify(LedgerError::Rpc("invalid opcode: MCOPY".into())),
            LedgerError::Compatibility(_)
        ));
        assert!(matches!(
            sigs.classify(LedgerError::Reverted("unsupported push0".into())),
            LedgerError::Compatibility(_)
        ));
        assert!(matches!(
            sigs.classify(LedgerError::Rpc("nonce too low".into())),
            LedgerError::Rpc(_)
        ));
        assert!(matches!(
            sigs.classify(LedgerError::InsufficientResources("invalid opcode".into())),
            LedgerError::InsufficientResources(_)
        ));
    }

    #[test]
    fn test_empty_signatures_are_dropped() {
        let sigs = CompatibilitySignatures::new(["", "  "]);
        assert_eq!(sigs.matching("anything"), None);
    }
}
