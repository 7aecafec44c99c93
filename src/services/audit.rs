//! Reconciliation audit log
//!
//! Append-only record of every ledger interaction attempt. Writes never fail
//! the operation being audited: a store error is logged and dropped.

use bson::DateTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::auth::Session;
use crate::db::schemas::{AuditDoc, AuditKind, AuditOutcome};
use crate::db::AttestationStore;
use crate::types::Result;

/// Default trailing window for surfacing compatibility downgrades
pub const DEFAULT_COMPAT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Who triggered a ledger interaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
}

impl Actor {
    pub fn from_session(session: &Session, ip_address: Option<String>) -> Self {
        Self {
            user_id: Some(session.id.clone()),
            ip_address,
        }
    }

    /// Background work with no requesting user
    pub fn system() -> Self {
        Self::default()
    }
}

pub struct AuditLog {
    store: Arc<dyn AttestationStore>,
    compat_window: Duration,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AttestationStore>) -> Self {
        Self {
            store,
            compat_window: DEFAULT_COMPAT_WINDOW,
        }
    }

    pub fn with_compat_window(mut self, window: Duration) -> Self {
        self.compat_window = window;
        self
    }

    /// How far back a compatibility failure is still reported
    pub fn compat_window(&self) -> Duration {
        self.compat_window
    }

    /// Append an entry. Store failures are logged, not returned.
    pub async fn record(
        &self,
        kind: AuditKind,
        outcome: AuditOutcome,
        detail: impl Into<String>,
        actor: &Actor,
    ) {
        let entry = AuditDoc::new(kind, outcome, detail)
            .with_actor(actor.user_id.clone(), actor.ip_address.clone());
        let action = entry.action.clone();

        match self.store.append_audit(entry).await {
            Ok(()) => info!(action = %action, user_id = ?actor.user_id, "Ledger audit entry recorded"),
            Err(e) => error!(action = %action, error = %e, "Failed to persist ledger audit entry"),
        }
    }

    /// Recent entries, newest first
    pub async fn recent(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditDoc>> {
        self.store.list_audit(kind, limit).await
    }

    /// Compatibility downgrades inside the trailing window, newest first
    pub async fn recent_compat_errors(&self, limit: usize) -> Result<Vec<AuditDoc>> {
        let since = self.window_start();
        let entries = self
            .store
            .list_audit(Some(AuditKind::CompatDowngrade), limit)
            .await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.created_at >= since)
            .collect())
    }

    /// Most recent compatibility downgrade inside the trailing window
    pub async fn latest_compat_error(&self) -> Result<Option<AuditDoc>> {
        self.store
            .latest_audit_since(AuditKind::CompatDowngrade, self.window_start())
            .await
    }

    fn window_start(&self) -> DateTime {
        let window_ms = i64::try_from(self.compat_window.as_millis()).unwrap_or(i64::MAX);
        DateTime::from_millis(DateTime::now().timestamp_millis().saturating_sub(window_ms))
    }
}
