//! Grade document schema
//!
//! The authoritative off-chain grade. Only the fields the attestation
//! workflow reads or writes are modelled here.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for grades
pub const GRADE_COLLECTION: &str = "grades";

/// Review status of a grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum GradeStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl GradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeStatus::Pending => "PENDING",
            GradeStatus::Verified => "VERIFIED",
            GradeStatus::Rejected => "REJECTED",
        }
    }
}

/// Grade document
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GradeDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub student_id: String,
    pub course_id: String,
    pub teacher_id: String,

    /// Integer score in 0..=100
    pub score: u8,

    pub semester: String,

    pub status: GradeStatus,

    /// Opaque status/timestamp context supplied by the grade editor
    #[serde(default)]
    pub context: serde_json::Value,

    /// Ledger identifier of the current attestation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_grade_id: Option<String>,

    /// Transaction carrying the current attestation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

impl GradeDoc {
    pub fn new(
        student_id: impl Into<String>,
        course_id: impl Into<String>,
        teacher_id: impl Into<String>,
        score: u8,
        semester: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            student_id: student_id.into(),
            course_id: course_id.into(),
            teacher_id: teacher_id.into(),
            score,
            semester: semester.into(),
            status: GradeStatus::Pending,
            context: serde_json::Value::Null,
            blockchain_grade_id: None,
            transaction_hash: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Whether the grade has ever been written to the ledger
    pub fn is_attested(&self) -> bool {
        self.transaction_hash.is_some()
    }
}

impl IntoIndexes for GradeDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "student_id": 1, "course_id": 1, "semester": 1 },
                Some(
                    IndexOptions::builder()
                        .name("student_course_semester".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "blockchain_grade_id": 1 },
                Some(
                    IndexOptions::builder()
                        .sparse(true)
                        .name("blockchain_grade_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for GradeDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
