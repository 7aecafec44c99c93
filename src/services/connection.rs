//! Ledger connection manager
//!
//! Owns the process-wide `ConnectionState`, the resolved ledger settings and
//! the cached real client. All three live in one immutable snapshot that is
//! replaced as a whole, so a reader never sees a half-applied reload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{ConfigSource, LedgerSettings};
use crate::db::schemas::{AuditKind, AuditOutcome};
use crate::ledger::{LedgerClient, LedgerError, RpcLedgerClient, SimulatedLedger};
use crate::services::audit::{Actor, AuditLog};
use crate::types::Result;

/// Builds the real client for a set of settings
pub type ClientFactory =
    Arc<dyn Fn(&LedgerSettings) -> std::result::Result<Arc<dyn LedgerClient>, LedgerError> + Send + Sync>;

/// Factory for the JSON-RPC client
pub fn rpc_client_factory() -> ClientFactory {
    Arc::new(|settings: &LedgerSettings| {
        let client = RpcLedgerClient::from_settings(settings)?;
        Ok(Arc::new(client) as Arc<dyn LedgerClient>)
    })
}

/// Process-wide view of the ledger link
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    pub mock_mode: bool,
    /// Raw message of the last compatibility failure
    pub compatibility_error: Option<String>,
    pub compatibility_error_at: Option<DateTime<Utc>>,
    /// Last connectivity failure
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Operator-facing status report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub mock_mode: bool,
    pub compatibility_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Settings, client and state that are swapped together
#[derive(Clone)]
pub struct ConnectionSnapshot {
    generation: u64,
    pub settings: LedgerSettings,
    pub client: Option<Arc<dyn LedgerClient>>,
    client_error: Option<String>,
    pub state: ConnectionState,
}

impl ConnectionSnapshot {
    fn build(
        generation: u64,
        settings: LedgerSettings,
        factory: &ClientFactory,
        force_mock: Option<bool>,
    ) -> Self {
        let (client, client_error) = if settings.has_endpoint() {
            match factory(&settings) {
                Ok(client) => (Some(client), None),
                Err(e) => {
                    warn!(error = %e, "Ledger client could not be built");
                    (None, Some(e.to_string()))
                }
            }
        } else {
            (None, Some("ledger endpoint not configured".to_string()))
        };

        let state = ConnectionState {
            mock_mode: force_mock.unwrap_or(settings.force_mock_mode),
            ..Default::default()
        };

        Self {
            generation,
            settings,
            client,
            client_error,
            state,
        }
    }
}

pub struct ConnectionManager {
    source: Arc<dyn ConfigSource>,
    factory: ClientFactory,
    simulated: Arc<SimulatedLedger>,
    audit: Arc<AuditLog>,
    snapshot: RwLock<Arc<ConnectionSnapshot>>,
    generation: AtomicU64,
}

impl ConnectionManager {
    /// Load settings from `source` and build the initial snapshot. Does not
    /// touch the network.
    pub fn new(
        source: Arc<dyn ConfigSource>,
        factory: ClientFactory,
        audit: Arc<AuditLog>,
    ) -> Result<Self> {
        let settings = source.load()?;
        let snapshot = ConnectionSnapshot::build(0, settings, &factory, None);

        info!(
            mock_mode = snapshot.state.mock_mode,
            has_endpoint = snapshot.client.is_some(),
            "Ledger connection manager initialised"
        );

        Ok(Self {
            source,
            factory,
            simulated: Arc::new(SimulatedLedger::new()),
            audit,
            snapshot: RwLock::new(Arc::new(snapshot)),
            generation: AtomicU64::new(0),
        })
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> Arc<ConnectionSnapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn state(&self) -> ConnectionState {
        self.snapshot().await.state.clone()
    }

    /// Shared simulation store, the same for every snapshot
    pub fn simulated(&self) -> Arc<SimulatedLedger> {
        self.simulated.clone()
    }

    /// Probe the configured node. Never errors: failures yield `false` and
    /// are recorded in the state.
    pub async fn check_connection(&self) -> bool {
        self.probe_and_update(true).await
    }

    async fn probe_and_update(&self, audit_transitions: bool) -> bool {
        let snap = self.snapshot().await;

        let outcome: std::result::Result<u64, String> = match &snap.client {
            None => Err(snap
                .client_error
                .clone()
                .unwrap_or_else(|| "ledger client unavailable".to_string())),
            Some(client) => {
                match tokio::time::timeout(snap.settings.rpc_timeout, client.probe()).await {
                    Ok(Ok(block)) => Ok(block),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!(
                        "probe timed out after {}ms",
                        snap.settings.rpc_timeout.as_millis()
                    )),
                }
            }
        };

        let connected = outcome.is_ok();
        match &outcome {
            Ok(block) => debug!(block = block, "Ledger node reachable"),
            Err(e) => warn!(error = %e, "Ledger node unreachable"),
        }

        let transitioned = {
            let mut guard = self.snapshot.write().await;
            if guard.generation != snap.generation {
                // A reload replaced the client while we were probing
                return connected;
            }
            let mut next = (**guard).clone();
            let transitioned =
                next.state.last_checked.is_none() || next.state.connected != connected;
            next.state.connected = connected;
            next.state.last_error = outcome.as_ref().err().cloned();
            next.state.last_checked = Some(Utc::now());
            *guard = Arc::new(next);
            transitioned
        };

        if audit_transitions && transitioned {
            let (outcome_kind, detail) = match outcome {
                Ok(block) => (AuditOutcome::Ok, format!("ledger reachable at block {}", block)),
                Err(e) => (AuditOutcome::Error, format!("ledger unreachable: {}", e)),
            };
            self.audit
                .record(AuditKind::Connect, outcome_kind, detail, &Actor::system())
                .await;
        }

        connected
    }

    /// Re-read configuration, drop the cached client and probe again.
    ///
    /// `force_mock` overrides the configured mock flag when given; otherwise
    /// the configured value applies and any persisted downgrade is cleared.
    pub async fn reload_config(
        &self,
        force_mock: Option<bool>,
        actor: &Actor,
    ) -> Result<ConnectionState> {
        let settings = match self.source.load() {
            Ok(settings) => settings,
            Err(e) => {
                self.audit
                    .record(
                        AuditKind::Connect,
                        AuditOutcome::Error,
                        format!("config reload failed: {}", e),
                        actor,
                    )
                    .await;
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = ConnectionSnapshot::build(generation, settings, &self.factory, force_mock);
        *self.snapshot.write().await = Arc::new(snapshot);

        let connected = self.probe_and_update(false).await;
        let state = self.state().await;

        let outcome = if state.mock_mode {
            AuditOutcome::Simulated
        } else if connected {
            AuditOutcome::Ok
        } else {
            AuditOutcome::Error
        };
        self.audit
            .record(
                AuditKind::Connect,
                outcome,
                format!(
                    "config reloaded: connected={} mock_mode={} forced={:?}",
                    state.connected, state.mock_mode, force_mock
                ),
                actor,
            )
            .await;

        info!(
            connected = state.connected,
            mock_mode = state.mock_mode,
            "Ledger configuration reloaded"
        );
        Ok(state)
    }

    /// Note a compatibility failure. Flips to mock mode only when the
    /// settings ask for a persistent downgrade. Returns whether it flipped.
    pub async fn degrade(&self, raw_error: &str) -> bool {
        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        next.state.compatibility_error = Some(raw_error.to_string());
        next.state.compatibility_error_at = Some(Utc::now());

        let flipped = next.settings.persist_compat_downgrade && !next.state.mock_mode;
        if flipped {
            next.state.mock_mode = true;
            warn!(error = %raw_error, "Persistently downgraded to simulated ledger");
        }
        *guard = Arc::new(next);
        flipped
    }

    /// Status for operators. The compatibility error is reported only while
    /// it is inside the audit window; otherwise the most recent downgrade in
    /// that window is used.
    pub async fn status(&self) -> Result<ConnectionStatus> {
        let state = self.state().await;
        let window = self.audit.compat_window();
        let live = match (state.compatibility_error, state.compatibility_error_at) {
            (Some(e), Some(at)) => {
                let fresh = (Utc::now() - at)
                    .to_std()
                    .map(|age| age <= window)
                    .unwrap_or(true);
                fresh.then_some(e)
            }
            _ => None,
        };
        let compatibility_error = match live {
            Some(e) => Some(e),
            None => self
                .audit
                .latest_compat_error()
                .await?
                .map(|entry| entry.details),
        };

        Ok(ConnectionStatus {
            connected: state.connected,
            mock_mode: state.mock_mode,
            compatibility_error,
            last_checked: state.last_checked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfigSource;
    use crate::db::MemoryStore;
    use crate::db::store::AttestationStore;
    use crate::ledger::{Broadcast, GradeEntry, Inclusion, LedgerMode, StoredGrade};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct ProbeOnly {
        up: Arc<AtomicBool>,
    }

    #[async_trait]
    impl LedgerClient for ProbeOnly {
        fn mode(&self) -> LedgerMode {
            LedgerMode::Real
        }
        async fn probe(&self) -> std::result::Result<u64, LedgerError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(42)
            } else {
                Err(LedgerError::ConnectionUnavailable("connection refused".into()))
            }
        }
        async fn broadcast_grade(&self, _: &GradeEntry) -> std::result::Result<Broadcast, LedgerError> {
            unreachable!()
        }
        async fn await_inclusion(&self, _: &str) -> std::result::Result<Inclusion, LedgerError> {
            unreachable!()
        }
        async fn transaction_receipt(
            &self,
            _: &str,
        ) -> std::result::Result<Option<Inclusion>, LedgerError> {
            unreachable!()
        }
        async fn get_grade(&self, _: &str) -> std::result::Result<Option<StoredGrade>, LedgerError> {
            unreachable!()
        }
    }

    fn configured() -> LedgerSettings {
        LedgerSettings {
            rpc_url: Some("http://127.0.0.1:8545".into()),
            account: Some("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23".into()),
            contract_address: Some("0x5fbdb2315678afecb367f032d93f642f64180aa3".into()),
            ..Default::default()
        }
    }

    fn build_manager(
        settings: LedgerSettings,
        up: Arc<AtomicBool>,
    ) -> (ConnectionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditLog::new(store.clone()));
        let factory: ClientFactory = Arc::new(move |_: &LedgerSettings| {
            Ok(Arc::new(ProbeOnly { up: up.clone() }) as Arc<dyn LedgerClient>)
        });
        let manager =
            ConnectionManager::new(Arc::new(StaticConfigSource(settings)), factory, audit).unwrap();
        (manager, store)
    }

    #[tokio::test]
    async fn test_check_connection_never_errors() {
        let up = Arc::new(AtomicBool::new(false));
        let (manager, _) = build_manager(configured(), up.clone());

        assert!(!manager.check_connection().await);
        let state = manager.state().await;
        assert!(!state.connected);
        assert!(state.last_error.unwrap().contains("refused"));

        up.store(true, Ordering::SeqCst);
        assert!(manager.check_connection().await);
        assert!(manager.state().await.last_error.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_is_disconnected() {
        let (manager, _) = build_manager(LedgerSettings::default(), Arc::new(AtomicBool::new(true)));
        assert!(!manager.check_connection().await);
        assert!(manager.snapshot().await.client.is_none());
    }

    #[tokio::test]
    async fn test_connect_audit_only_on_transition() {
        let up = Arc::new(AtomicBool::new(true));
        let (manager, store) = build_manager(configured(), up.clone());

        manager.check_connection().await;
        manager.check_connection().await;
        manager.check_connection().await;
        let entries = store.list_audit(Some(AuditKind::Connect), 10).await.unwrap();
        assert_eq!(entries.len(), 1);

        up.store(false, Ordering::SeqCst);
        manager.check_connection().await;
        let entries = store.list_audit(Some(AuditKind::Connect), 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, AuditOutcome::Error);
    }

    #[tokio::test]
    async fn test_reload_forces_mock_mode() {
        let (manager, store) = build_manager(configured(), Arc::new(AtomicBool::new(true)));
        assert!(!manager.state().await.mock_mode);

        let state = manager.reload_config(Some(true), &Actor::system()).await.unwrap();
        assert!(state.mock_mode);
        assert!(state.connected);

        let state = manager.reload_config(None, &Actor::system()).await.unwrap();
        assert!(!state.mock_mode);

        let entries = store.list_audit(Some(AuditKind::Connect), 10).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_degrade_respects_persist_flag() {
        let (manager, _) = build_manager(configured(), Arc::new(AtomicBool::new(true)));
        assert!(!manager.degrade("invalid opcode: MCOPY").await);
        let state = manager.state().await;
        assert!(!state.mock_mode);
        assert_eq!(state.compatibility_error.as_deref(), Some("invalid opcode: MCOPY"));

        let persistent = LedgerSettings {
            persist_compat_downgrade: true,
            ..configured()
        };
        let (manager, _) = build_manager(persistent, Arc::new(AtomicBool::new(true)));
        assert!(manager.degrade("invalid opcode: MCOPY").await);
        assert!(manager.state().await.mock_mode);
    }

    #[tokio::test]
    async fn test_status_drops_compat_error_outside_window() {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditLog::new(store).with_compat_window(Duration::from_millis(20)));
        let up = Arc::new(AtomicBool::new(true));
        let factory: ClientFactory = Arc::new(move |_: &LedgerSettings| {
            Ok(Arc::new(ProbeOnly { up: up.clone() }) as Arc<dyn LedgerClient>)
        });
        let manager =
            ConnectionManager::new(Arc::new(StaticConfigSource(configured())), factory, audit)
                .unwrap();

        manager.degrade("invalid opcode: MCOPY").await;
        assert_eq!(
            manager.status().await.unwrap().compatibility_error.as_deref(),
            Some("invalid opcode: MCOPY")
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.state().await.compatibility_error.is_some());
        assert!(manager.status().await.unwrap().compatibility_error.is_none());
    }

    #[tokio::test]
    async fn test_status_reads_compat_error_from_audit() {
        let (manager, store) = build_manager(configured(), Arc::new(AtomicBool::new(true)));
        assert!(manager.status().await.unwrap().compatibility_error.is_none());

        store
            .append_audit(crate::db::schemas::AuditDoc::new(
                AuditKind::CompatDowngrade,
                AuditOutcome::Simulated,
                "submit: invalid opcode: MCOPY",
            ))
            .await
            .unwrap();
        let status = manager.status().await.unwrap();
        assert_eq!(
            status.compatibility_error.as_deref(),
            Some("submit: invalid opcode: MCOPY")
        );
    }
}
