//! Change request document schema
//!
//! A change request is a proposed edit to one row, queued for
//! administrator review. Requests are never deleted; resolved requests
//! remain as the audit trail for the table.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, RowData};

/// Collection name for change requests
pub const CHANGE_REQUEST_COLLECTION: &str = "change_requests";

/// Review state of a change request. Pending is the only non-terminal
/// state; once resolved a request never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStatus::Pending => write!(f, "pending"),
            ChangeStatus::Approved => write!(f, "approved"),
            ChangeStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Administrator verdict on a pending change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn terminal_status(self) -> ChangeStatus {
        match self {
            ReviewDecision::Approve => ChangeStatus::Approved,
            ReviewDecision::Reject => ChangeStatus::Rejected,
        }
    }
}

/// Resolution details recorded when a request leaves pending
#[derive(Debug, Clone)]
pub struct Review {
    pub decision: ReviewDecision,
    pub reviewed_by: String,
    pub notes: Option<String>,
}

/// Change request document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ChangeRequestDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Table the target row belongs to
    pub table_id: ObjectId,

    /// Row the proposed changes apply to
    pub row_id: ObjectId,

    /// Proposed replacement data, same shape as the row's data
    #[serde(default)]
    pub proposed_changes: RowData,

    /// Attachment URLs backing the edit; non-empty in edit-with-proof mode
    #[serde(default)]
    pub proof_images: Vec<String>,

    /// User id of the requester
    pub requested_by: String,

    /// Review state
    #[serde(default)]
    pub status: ChangeStatus,

    /// User id of the reviewer, once resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,

    /// When the request was resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime>,

    /// Free-form reviewer notes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
}

impl ChangeRequestDoc {
    /// Create a new pending change request
    pub fn new(
        table_id: ObjectId,
        row_id: ObjectId,
        proposed_changes: RowData,
        proof_images: Vec<String>,
        requested_by: String,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            table_id,
            row_id,
            proposed_changes,
            proof_images,
            requested_by,
            status: ChangeStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
        }
    }
}

impl IntoIndexes for ChangeRequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "table_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("table_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ChangeRequestDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ChangeStatus::Pending).unwrap(),
            "\"pending\""
        );
        let status: ChangeStatus = serde_json::from_str("\"approved\"").unwrap();
        assert_eq!(status, ChangeStatus::Approved);
    }

    #[test]
    fn test_new_request_is_pending() {
        let request = ChangeRequestDoc::new(
            ObjectId::new(),
            ObjectId::new(),
            RowData::new(),
            vec!["https://proof.example/1.png".into()],
            "student-1".into(),
        );
        assert_eq!(request.status, ChangeStatus::Pending);
        assert!(request.reviewed_by.is_none());
        assert!(request.reviewed_at.is_none());
    }

    #[test]
    fn test_decision_maps_to_terminal_status() {
        assert_eq!(
            ReviewDecision::Approve.terminal_status(),
            ChangeStatus::Approved
        );
        assert_eq!(
            ReviewDecision::Reject.terminal_status(),
            ChangeStatus::Rejected
        );
    }
}
