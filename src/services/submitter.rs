//! Transaction submitter
//!
//! Validates a grade payload, writes it to the ledger chosen by the mode
//! selector and records exactly one transaction record and one `SUBMIT`
//! audit entry per submission that reached a ledger.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::db::schemas::{AuditKind, AuditOutcome, ConfirmationStatus, LedgerTxDoc};
use crate::db::AttestationStore;
use crate::ledger::{GradeEntry, Inclusion, LedgerClient, LedgerError};
use crate::services::audit::{Actor, AuditLog};
use crate::services::mode::ModeSelector;
use crate::types::{AttestError, Result};

pub const MIN_SCORE: i64 = 0;
pub const MAX_SCORE: i64 = 100;

/// Reject scores outside 0..=100
pub fn validate_score(score: i64) -> Result<u8> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(AttestError::InvalidInput(format!(
            "score must be an integer between {} and {}, got {}",
            MIN_SCORE, MAX_SCORE, score
        )));
    }
    u8::try_from(score).map_err(|_| AttestError::InvalidInput(format!("invalid score {}", score)))
}

pub(crate) fn require_field(name: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AttestError::InvalidInput(format!("{} is required", name)));
    }
    Ok(trimmed.to_string())
}

/// Grade payload from a caller
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSubmission {
    /// Stored grade this submission attests, if any
    #[serde(default)]
    pub grade_id: Option<String>,
    pub student_id: String,
    pub course_id: String,
    pub score: i64,
    pub semester: String,
    pub teacher_id: String,
    /// Already-serialized metadata
    #[serde(default)]
    pub metadata: String,
}

impl GradeSubmission {
    /// Check every field before anything touches the network
    pub fn validate(&self) -> Result<GradeEntry> {
        Ok(GradeEntry {
            student_id: require_field("studentId", &self.student_id)?,
            course_id: require_field("courseId", &self.course_id)?,
            score: validate_score(self.score)?,
            semester: require_field("semester", &self.semester)?,
            teacher_id: require_field("teacherId", &self.teacher_id)?,
            metadata: self.metadata.clone(),
        })
    }
}

/// Ledger reference returned to callers, same shape for both variants
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerResult {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
    pub blockchain_grade_id: Option<String>,
    pub confirmation_status: ConfirmationStatus,
    pub simulated: bool,
}

impl From<&LedgerTxDoc> for LedgerResult {
    fn from(record: &LedgerTxDoc) -> Self {
        Self {
            transaction_hash: record.transaction_hash.clone(),
            block_number: record.block_number,
            blockchain_grade_id: record.blockchain_grade_id.clone(),
            confirmation_status: record.status,
            simulated: record.simulated,
        }
    }
}

/// What a ledger reported for one submission
#[derive(Debug, Clone)]
enum Submission {
    Included(Inclusion),
    /// Broadcast, but inclusion was not observed in time
    Pending { tx_hash: String, reason: String },
}

impl Submission {
    fn tx_hash(&self) -> &str {
        match self {
            Submission::Included(inclusion) => &inclusion.tx_hash,
            Submission::Pending { tx_hash, .. } => tx_hash,
        }
    }
}

/// Broadcast and wait for inclusion within `limit`.
///
/// Failures before the node accepted the transaction are errors (and may be
/// retried on the simulation). Once a hash exists the outcome is never an
/// error: a late or failed receipt poll leaves the submission pending.
async fn submit_on(
    client: Arc<dyn LedgerClient>,
    entry: &GradeEntry,
    limit: Duration,
) -> std::result::Result<Submission, LedgerError> {
    let started = Instant::now();
    let broadcast = match timeout(limit, client.broadcast_grade(entry)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(LedgerError::Timeout(format!(
                "submission not accepted within {}ms",
                limit.as_millis()
            )))
        }
    };

    let remaining = limit.saturating_sub(started.elapsed());
    match timeout(remaining, client.await_inclusion(&broadcast.tx_hash)).await {
        Ok(Ok(inclusion)) => Ok(Submission::Included(inclusion)),
        Ok(Err(e)) => Ok(Submission::Pending {
            tx_hash: broadcast.tx_hash,
            reason: e.to_string(),
        }),
        Err(_) => Ok(Submission::Pending {
            tx_hash: broadcast.tx_hash,
            reason: format!("inclusion not observed within {}ms", limit.as_millis()),
        }),
    }
}

pub struct TransactionSubmitter {
    selector: Arc<ModeSelector>,
    store: Arc<dyn AttestationStore>,
    audit: Arc<AuditLog>,
}

impl TransactionSubmitter {
    pub fn new(
        selector: Arc<ModeSelector>,
        store: Arc<dyn AttestationStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            selector,
            store,
            audit,
        }
    }

    /// Anchor a grade on the ledger.
    pub async fn submit_grade(
        &self,
        submission: &GradeSubmission,
        actor: &Actor,
    ) -> Result<LedgerResult> {
        let entry = submission.validate()?;
        let limit = self
            .selector
            .connection()
            .snapshot()
            .await
            .settings
            .submit_timeout;

        let entry_ref = &entry;
        let routed = match self
            .selector
            .run("submit", actor, move |client| submit_on(client, entry_ref, limit))
            .await
        {
            Ok(routed) => routed,
            Err(err) => {
                self.audit
                    .record(
                        AuditKind::Submit,
                        AuditOutcome::Error,
                        format!(
                            "student={} course={} semester={}: {}",
                            entry.student_id, entry.course_id, entry.semester, err
                        ),
                        actor,
                    )
                    .await;
                return Err(err.into());
            }
        };

        let simulated = routed.mode.is_simulated();
        let mut record = LedgerTxDoc::new(routed.value.tx_hash(), simulated);
        record.grade_id = submission.grade_id.clone();

        match &routed.value {
            Submission::Included(inclusion) => {
                record.block_number = Some(inclusion.block_number);
                if !inclusion.succeeded {
                    record.status = ConfirmationStatus::Failed;
                } else if let Some(grade_id) = &inclusion.grade_id {
                    record.blockchain_grade_id = Some(grade_id.clone());
                    record.status = ConfirmationStatus::Confirmed;
                    record.confirmed_at = Some(bson::DateTime::now());
                } else {
                    warn!(
                        tx_hash = %inclusion.tx_hash,
                        "Transaction included without GradeAdded event, leaving record pending"
                    );
                }
            }
            Submission::Pending { tx_hash, reason } => {
                warn!(tx_hash = %tx_hash, reason = %reason, "Submission broadcast but not confirmed");
            }
        }

        let result = LedgerResult::from(&record);
        let fallback = routed
            .fallback
            .as_ref()
            .map(|r| format!(" fallback={}", r.label()))
            .unwrap_or_default();
        let detail = format!(
            "student={} course={} semester={} tx={} status={}{}",
            entry.student_id,
            entry.course_id,
            entry.semester,
            record.transaction_hash,
            record.status.as_str(),
            fallback
        );

        if let Err(e) = self.store.insert_tx(record).await {
            self.audit
                .record(
                    AuditKind::Submit,
                    AuditOutcome::Error,
                    format!("{} record_error={}", detail, e),
                    actor,
                )
                .await;
            return Err(e);
        }

        let outcome = if result.confirmation_status == ConfirmationStatus::Failed {
            AuditOutcome::Error
        } else if simulated {
            AuditOutcome::Simulated
        } else {
            AuditOutcome::Ok
        };
        self.audit
            .record(AuditKind::Submit, outcome, detail, actor)
            .await;

        if result.confirmation_status == ConfirmationStatus::Failed {
            return Err(AttestError::Ledger(format!(
                "transaction {} reverted on inclusion",
                result.transaction_hash
            )));
        }

        info!(
            tx_hash = %result.transaction_hash,
            simulated = result.simulated,
            status = result.confirmation_status.as_str(),
            "Grade submitted to ledger"
        );
        Ok(result)
    }
}
