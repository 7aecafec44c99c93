//! Grade attestation workflow
//!
//! Grade-level operations on top of the submitter and verifier. The grade
//! store's guarded status transition is the single-writer check: of two
//! concurrent verifications of one grade, only one moves it out of `PENDING`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{Role, Session};
use crate::db::schemas::{ConfirmationStatus, GradeDoc, GradeStatus};
use crate::db::AttestationStore;
use crate::services::audit::Actor;
use crate::services::submitter::{
    require_field, validate_score, GradeSubmission, LedgerResult, TransactionSubmitter,
};
use crate::services::verifier::{ExpectedGrade, RecordVerifier, VerificationResult};
use crate::types::{AttestError, Result};

/// New grade from a teacher or admin
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGrade {
    pub student_id: String,
    pub course_id: String,
    pub score: i64,
    pub semester: String,
    /// Defaults to the session user for teachers
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeView {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub score: u8,
    pub semester: String,
    pub status: GradeStatus,
    pub blockchain_grade_id: Option<String>,
    pub transaction_hash: Option<String>,
}

impl From<&GradeDoc> for GradeView {
    fn from(grade: &GradeDoc) -> Self {
        Self {
            id: grade.id.clone(),
            student_id: grade.student_id.clone(),
            course_id: grade.course_id.clone(),
            teacher_id: grade.teacher_id.clone(),
            score: grade.score,
            semester: grade.semester.clone(),
            status: grade.status,
            blockchain_grade_id: grade.blockchain_grade_id.clone(),
            transaction_hash: grade.transaction_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeVerification {
    pub grade: GradeView,
    pub verification: VerificationResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEdit {
    pub grade: GradeView,
    /// New attestation when the grade had been attested before the edit
    pub attestation: Option<LedgerResult>,
}

pub struct GradeWorkflow {
    store: Arc<dyn AttestationStore>,
    submitter: Arc<TransactionSubmitter>,
    verifier: Arc<RecordVerifier>,
}

impl GradeWorkflow {
    pub fn new(
        store: Arc<dyn AttestationStore>,
        submitter: Arc<TransactionSubmitter>,
        verifier: Arc<RecordVerifier>,
    ) -> Self {
        Self {
            store,
            submitter,
            verifier,
        }
    }

    async fn load(&self, grade_id: &str) -> Result<GradeDoc> {
        self.store
            .get_grade(grade_id)
            .await?
            .ok_or_else(|| AttestError::NotFound(format!("Grade {} not found", grade_id)))
    }

    /// Teachers may only act on their own grades
    fn check_owner(grade: &GradeDoc, session: &Session) -> Result<()> {
        if session.role == Role::Teacher && grade.teacher_id != session.id {
            return Err(AttestError::Forbidden(
                "Grade belongs to another teacher".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn create_grade(&self, input: NewGrade, session: &Session) -> Result<GradeView> {
        let teacher_id = match (&input.teacher_id, session.role) {
            (Some(id), Role::Admin) => require_field("teacherId", id)?,
            (Some(id), _) if id.trim() != session.id => {
                return Err(AttestError::Forbidden(
                    "Teachers can only create their own grades".to_string(),
                ))
            }
            _ => session.id.clone(),
        };

        let grade = GradeDoc::new(
            require_field("studentId", &input.student_id)?,
            require_field("courseId", &input.course_id)?,
            teacher_id,
            validate_score(input.score)?,
            require_field("semester", &input.semester)?,
        )
        .with_context(input.context);

        let view = GradeView::from(&grade);
        self.store.insert_grade(grade).await?;
        info!(grade_id = %view.id, "Grade created");
        Ok(view)
    }

    pub async fn get_grade(&self, grade_id: &str) -> Result<GradeView> {
        Ok(GradeView::from(&self.load(grade_id).await?))
    }

    fn submission_for(grade: &GradeDoc) -> GradeSubmission {
        GradeSubmission {
            grade_id: Some(grade.id.clone()),
            student_id: grade.student_id.clone(),
            course_id: grade.course_id.clone(),
            score: i64::from(grade.score),
            semester: grade.semester.clone(),
            teacher_id: grade.teacher_id.clone(),
            metadata: serde_json::json!({
                "gradeId": grade.id,
                "context": grade.context,
            })
            .to_string(),
        }
    }

    async fn attest(&self, grade: &GradeDoc, actor: &Actor) -> Result<LedgerResult> {
        let result = self
            .submitter
            .submit_grade(&Self::submission_for(grade), actor)
            .await?;
        self.store
            .set_attestation(
                &grade.id,
                &result.transaction_hash,
                result.blockchain_grade_id.as_deref(),
            )
            .await?;
        Ok(result)
    }

    /// Write a pending grade to the ledger and link the result to it
    pub async fn attest_grade(
        &self,
        grade_id: &str,
        session: &Session,
        actor: &Actor,
    ) -> Result<LedgerResult> {
        let grade = self.load(grade_id).await?;
        Self::check_owner(&grade, session)?;

        if grade.status != GradeStatus::Pending {
            return Err(AttestError::Conflict(format!(
                "Grade is {}, only PENDING grades can be attested",
                grade.status.as_str()
            )));
        }
        if grade.is_attested() {
            return Err(AttestError::Conflict(
                "Grade already attested; edit the score to attest a new record".to_string(),
            ));
        }

        self.attest(&grade, actor).await
    }

    /// Check the grade against its ledger record and settle its status.
    ///
    /// `PENDING -> VERIFIED` requires a confirmed or simulated transaction
    /// record and matching ledger content. A content mismatch moves the grade
    /// to `REJECTED`.
    pub async fn verify_grade_record(
        &self,
        grade_id: &str,
        session: &Session,
        actor: &Actor,
    ) -> Result<GradeVerification> {
        let grade = self.load(grade_id).await?;
        Self::check_owner(&grade, session)?;
        if grade.status != GradeStatus::Pending {
            return Err(AttestError::Conflict(format!(
                "Grade is already {}",
                grade.status.as_str()
            )));
        }
        let Some(tx_hash) = grade.transaction_hash.as_deref() else {
            return Err(AttestError::Conflict("Grade has not been attested".to_string()));
        };
        let record = self.store.get_tx(tx_hash).await?.ok_or_else(|| {
            AttestError::Internal(format!("Transaction record {} missing", tx_hash))
        })?;

        let anchored = record.simulated || record.status == ConfirmationStatus::Confirmed;
        let ledger_id = grade
            .blockchain_grade_id
            .clone()
            .or_else(|| record.blockchain_grade_id.clone());
        let ledger_id = match (anchored, ledger_id) {
            (true, Some(id)) => id,
            _ => {
                return Err(AttestError::Conflict(format!(
                    "Attestation {} is {}, not yet confirmed",
                    tx_hash,
                    record.status.as_str()
                )))
            }
        };

        let expected = ExpectedGrade {
            student_id: grade.student_id.clone(),
            course_id: grade.course_id.clone(),
            score: i64::from(grade.score),
            semester: grade.semester.clone(),
            teacher_id: grade.teacher_id.clone(),
        };
        let verification = self
            .verifier
            .verify_grade(&ledger_id, &expected, actor)
            .await?;

        if verification.simulated != record.simulated {
            warn!(grade_id = %grade.id, tx_hash, "Attesting ledger unavailable, verification deferred");
            return Err(AttestError::Conflict(format!(
                "Ledger holding attestation {} is unavailable; retry verification",
                tx_hash
            )));
        }
        if !verification.exists {
            warn!(grade_id = %grade.id, ledger_id = %ledger_id, "Attested record not found on ledger");
            return Err(AttestError::Conflict(format!(
                "Ledger record {} not found; retry verification",
                ledger_id
            )));
        }

        let target = if verification.matches {
            GradeStatus::Verified
        } else {
            GradeStatus::Rejected
        };
        if !self
            .store
            .transition_status(&grade.id, GradeStatus::Pending, target)
            .await?
        {
            return Err(AttestError::Conflict(
                "Grade was modified concurrently".to_string(),
            ));
        }

        info!(grade_id = %grade.id, status = target.as_str(), simulated = verification.simulated, "Grade verification settled");

        let grade = self.load(grade_id).await?;
        Ok(GradeVerification {
            grade: GradeView::from(&grade),
            verification,
        })
    }

    /// Change the score. An attested grade is re-attested as a new ledger
    /// record; earlier transaction records stay as they are.
    pub async fn edit_score(
        &self,
        grade_id: &str,
        score: i64,
        session: &Session,
        actor: &Actor,
    ) -> Result<ScoreEdit> {
        let score = validate_score(score)?;
        let grade = self.load(grade_id).await?;
        Self::check_owner(&grade, session)?;

        let was_attested = grade.is_attested();
        if !self.store.update_score(&grade.id, score).await? {
            return Err(AttestError::NotFound(format!("Grade {} not found", grade_id)));
        }

        let updated = self.load(grade_id).await?;
        let attestation = if was_attested {
            Some(self.attest(&updated, actor).await?)
        } else {
            None
        };

        let grade = self.load(grade_id).await?;
        Ok(ScoreEdit {
            grade: GradeView::from(&grade),
            attestation,
        })
    }
}
