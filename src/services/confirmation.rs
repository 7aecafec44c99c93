//! Confirmation tracker
//!
//! Resolves real transaction records left `PENDING` by the submitter because
//! inclusion was not observed before the submission timeout.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::db::schemas::{ConfirmationStatus, LedgerTxDoc, TxResolution};
use crate::db::AttestationStore;
use crate::services::connection::ConnectionManager;
use crate::types::Result;

/// Records examined per sweep
const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub still_pending: usize,
    /// Sweep skipped because no real ledger is in use
    pub skipped: bool,
}

pub struct ConfirmationTracker {
    store: Arc<dyn AttestationStore>,
    connection: Arc<ConnectionManager>,
    batch_size: usize,
}

impl ConfirmationTracker {
    pub fn new(store: Arc<dyn AttestationStore>, connection: Arc<ConnectionManager>) -> Self {
        Self {
            store,
            connection,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Poll receipts for pending real transactions once.
    ///
    /// Stops at the first node error; the rest are retried next sweep.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let snap = self.connection.snapshot().await;
        let client = match (&snap.client, snap.state.mock_mode) {
            (Some(client), false) => client.clone(),
            _ => {
                return Ok(SweepReport {
                    skipped: true,
                    ..Default::default()
                })
            }
        };

        let pending = self.store.pending_real_txs(self.batch_size).await?;
        let mut report = SweepReport::default();

        for record in &pending {
            report.checked += 1;

            let receipt = match timeout(
                snap.settings.rpc_timeout,
                client.transaction_receipt(&record.transaction_hash),
            )
            .await
            {
                Ok(Ok(receipt)) => receipt,
                Ok(Err(e)) => {
                    warn!(tx_hash = %record.transaction_hash, error = %e, "Receipt poll failed, ending sweep");
                    report.still_pending += 1;
                    break;
                }
                Err(_) => {
                    warn!(tx_hash = %record.transaction_hash, "Receipt poll timed out, ending sweep");
                    report.still_pending += 1;
                    break;
                }
            };

            let Some(inclusion) = receipt else {
                report.still_pending += 1;
                continue;
            };

            let resolution = if !inclusion.succeeded {
                TxResolution {
                    status: ConfirmationStatus::Failed,
                    block_number: Some(inclusion.block_number),
                    blockchain_grade_id: None,
                }
            } else if let Some(grade_id) = inclusion.grade_id.clone() {
                TxResolution {
                    status: ConfirmationStatus::Confirmed,
                    block_number: Some(inclusion.block_number),
                    blockchain_grade_id: Some(grade_id),
                }
            } else {
                warn!(tx_hash = %record.transaction_hash, "Transaction included without GradeAdded event");
                TxResolution {
                    status: ConfirmationStatus::Pending,
                    block_number: Some(inclusion.block_number),
                    blockchain_grade_id: None,
                }
            };

            let status = resolution.status;
            let ledger_id = resolution.blockchain_grade_id.clone();
            if !self
                .store
                .resolve_tx(&record.transaction_hash, resolution)
                .await?
            {
                debug!(tx_hash = %record.transaction_hash, "Record already resolved");
                continue;
            }

            match status {
                ConfirmationStatus::Confirmed => {
                    report.confirmed += 1;
                    self.link_grade(record, ledger_id.as_deref()).await?;
                }
                ConfirmationStatus::Failed => report.failed += 1,
                ConfirmationStatus::Pending => report.still_pending += 1,
            }
        }

        if report.checked > 0 {
            info!(
                checked = report.checked,
                confirmed = report.confirmed,
                failed = report.failed,
                still_pending = report.still_pending,
                "Confirmation sweep completed"
            );
        }
        Ok(report)
    }

    /// Fill in the ledger id on the grade if this is still its current attestation
    async fn link_grade(&self, record: &LedgerTxDoc, ledger_id: Option<&str>) -> Result<()> {
        let Some(grade_id) = record.grade_id.as_deref() else {
            return Ok(());
        };
        let Some(grade) = self.store.get_grade(grade_id).await? else {
            return Ok(());
        };
        if grade.transaction_hash.as_deref() == Some(record.transaction_hash.as_str()) {
            self.store
                .set_attestation(grade_id, &record.transaction_hash, ledger_id)
                .await?;
        }
        Ok(())
    }
}

/// Run a sweep every `interval`
pub fn spawn_confirmation_task(
    tracker: Arc<ConfirmationTracker>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let handle = tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        // First tick completes immediately
        interval_timer.tick().await;
        loop {
            interval_timer.tick().await;
            if let Err(e) = tracker.sweep().await {
                warn!(error = %e, "Confirmation sweep failed");
            }
        }
    });

    info!(
        interval_secs = interval.as_secs(),
        "Confirmation tracker task started"
    );
    handle
}
