//! Common metadata for stored documents
//!
//! Creation and last-update timestamps. Attestation records are append-only,
//! so unlike user-facing collections there is no soft-delete marker.

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Common metadata for all documents
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata with current timestamp
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Record a modification
    pub fn touch(&mut self) {
        self.updated_at = Some(DateTime::now());
    }
}
