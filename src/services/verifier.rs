//! Record verifier
//!
//! Looks up a ledger record and compares it field by field with the
//! expected off-chain grade. Absence and mismatch are results, not errors.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::db::schemas::{AuditKind, AuditOutcome};
use crate::ledger::{normalize_grade_id, LedgerClient, LedgerError, StoredGrade};
use crate::services::audit::{Actor, AuditLog};
use crate::services::mode::ModeSelector;
use crate::services::submitter::{require_field, validate_score};
use crate::types::{AttestError, Result};

/// Grade content a ledger record is expected to hold
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedGrade {
    pub student_id: String,
    pub course_id: String,
    pub score: i64,
    pub semester: String,
    pub teacher_id: String,
}

impl ExpectedGrade {
    fn validate(&self) -> Result<()> {
        require_field("studentId", &self.student_id)?;
        require_field("courseId", &self.course_id)?;
        require_field("semester", &self.semester)?;
        require_field("teacherId", &self.teacher_id)?;
        validate_score(self.score)?;
        Ok(())
    }

    fn matches(&self, stored: &StoredGrade) -> bool {
        stored.student_id == self.student_id.trim()
            && stored.course_id == self.course_id.trim()
            && i64::try_from(stored.score).ok() == Some(self.score)
            && stored.semester == self.semester.trim()
            && stored.teacher_id == self.teacher_id.trim()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub exists: bool,
    /// Always false when `exists` is false
    pub matches: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_record: Option<StoredGrade>,
    pub simulated: bool,
}

impl VerificationResult {
    fn compare(stored: Option<StoredGrade>, expected: &ExpectedGrade, simulated: bool) -> Self {
        match stored {
            Some(record) => Self {
                exists: true,
                matches: expected.matches(&record),
                stored_record: Some(record),
                simulated,
            },
            None => Self {
                exists: false,
                matches: false,
                stored_record: None,
                simulated,
            },
        }
    }
}

async fn lookup_on(
    client: Arc<dyn LedgerClient>,
    grade_id: &str,
    limit: Duration,
) -> std::result::Result<Option<StoredGrade>, LedgerError> {
    match timeout(limit, client.get_grade(grade_id)).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout(format!(
            "lookup did not complete within {}ms",
            limit.as_millis()
        ))),
    }
}

pub struct RecordVerifier {
    selector: Arc<ModeSelector>,
    audit: Arc<AuditLog>,
}

impl RecordVerifier {
    pub fn new(selector: Arc<ModeSelector>, audit: Arc<AuditLog>) -> Self {
        Self { selector, audit }
    }

    /// Check that `blockchain_grade_id` resolves to `expected`.
    ///
    /// Identifiers minted by the simulation are answered from it in any mode.
    pub async fn verify_grade(
        &self,
        blockchain_grade_id: &str,
        expected: &ExpectedGrade,
        actor: &Actor,
    ) -> Result<VerificationResult> {
        let grade_id = normalize_grade_id(blockchain_grade_id).ok_or_else(|| {
            AttestError::InvalidInput("blockchainGradeId must be 32 bytes of hex".to_string())
        })?;
        expected.validate()?;

        let connection = self.selector.connection();
        let simulation = connection.simulated();

        let (stored, simulated, fallback) = if simulation.contains(&grade_id) {
            let stored = simulation.get_grade(&grade_id).await?;
            (stored, true, None)
        } else {
            let limit = connection.snapshot().await.settings.submit_timeout;
            let id_ref = grade_id.as_str();
            match self
                .selector
                .run("verify", actor, move |client| lookup_on(client, id_ref, limit))
                .await
            {
                Ok(routed) => (routed.value, routed.mode.is_simulated(), routed.fallback),
                Err(err) => {
                    self.audit
                        .record(
                            AuditKind::Verify,
                            AuditOutcome::Error,
                            format!("grade_id={}: {}", grade_id, err),
                            actor,
                        )
                        .await;
                    return Err(err.into());
                }
            }
        };

        let result = VerificationResult::compare(stored, expected, simulated);
        if result.exists && !result.matches {
            warn!(grade_id = %grade_id, "VERIFICATION_FAILED: ledger content differs from expected grade");
        }

        let fallback = fallback
            .map(|r| format!(" fallback={}", r.label()))
            .unwrap_or_default();
        self.audit
            .record(
                AuditKind::Verify,
                if simulated {
                    AuditOutcome::Simulated
                } else {
                    AuditOutcome::Ok
                },
                format!(
                    "grade_id={} exists={} matches={}{}",
                    grade_id, result.exists, result.matches, fallback
                ),
                actor,
            )
            .await;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> StoredGrade {
        StoredGrade {
            student_id: "s1".into(),
            course_id: "c1".into(),
            score: 85,
            semester: "2024-1".into(),
            teacher_id: "t1".into(),
            metadata: "{}".into(),
            timestamp: 1_700_000_000,
        }
    }

    fn expected(score: i64) -> ExpectedGrade {
        ExpectedGrade {
            student_id: "s1".into(),
            course_id: "c1".into(),
            score,
            semester: "2024-1".into(),
            teacher_id: "t1".into(),
        }
    }

    #[test]
    fn test_absent_never_matches() {
        let result = VerificationResult::compare(None, &expected(85), false);
        assert!(!result.exists);
        assert!(!result.matches);
        assert!(result.stored_record.is_none());
    }

    #[test]
    fn test_field_comparison() {
        assert!(VerificationResult::compare(Some(stored()), &expected(85), false).matches);

        let result = VerificationResult::compare(Some(stored()), &expected(84), false);
        assert!(result.exists);
        assert!(!result.matches);

        let mut other_teacher = expected(85);
        other_teacher.teacher_id = "t2".into();
        assert!(!VerificationResult::compare(Some(stored()), &other_teacher, false).matches);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(VerificationResult::compare(None, &expected(85), true)).unwrap();
        assert_eq!(json["exists"], false);
        assert_eq!(json["matches"], false);
        assert!(json.get("storedRecord").is_none());
    }
}
