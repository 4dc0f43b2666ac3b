//! Change-control workflow for information tables
//!
//! The rules, independent of transport and storage:
//! - view-only tables reject every edit
//! - editable tables apply edits directly and stamp the edit trail
//! - edit-with-proof tables require at least one proof attachment and
//!   queue the edit as a pending change request
//! - approving a pending request applies its changes to the row;
//!   rejecting leaves the row untouched; both resolutions are final

pub mod mongo;
pub mod store;

pub use mongo::MongoTableStore;
pub use store::{ChangeRequestFilter, MemoryTableStore, TableStore};

use bson::oid::ObjectId;
use tracing::{info, warn};

use crate::db::schemas::{
    ChangeRequestDoc, ChangeStatus, PermissionMode, Review, RowData, RowDoc, TableDoc,
};
use crate::types::{LecternError, Result};

/// Authenticated identity an edit or review is attributed to
#[derive(Debug, Clone)]
pub struct EditorContext {
    /// User document id (hex ObjectId)
    pub user_id: String,
    /// Name recorded in edit trails
    pub display_name: String,
}

/// What happened to a submitted edit
#[derive(Debug, Clone)]
pub enum EditOutcome {
    /// The table is editable; the row now carries the changes
    Applied(RowDoc),
    /// The table requires review; the edit is queued as a pending request
    Queued(ChangeRequestDoc),
}

/// Routing decision for an edit, before any storage happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditDisposition {
    Direct,
    Queue,
}

/// Decide how an edit is handled under the table's permission mode.
/// Pure so the mode rules can be tested without a store.
fn decide_edit(mode: PermissionMode, proof_count: usize) -> Result<EditDisposition> {
    match mode {
        PermissionMode::ViewOnly => Err(LecternError::PermissionDenied(
            "table is view-only".into(),
        )),
        PermissionMode::Editable => Ok(EditDisposition::Direct),
        PermissionMode::EditWithProof => {
            if proof_count == 0 {
                Err(LecternError::Validation(
                    "at least one proof attachment is required".into(),
                ))
            } else {
                Ok(EditDisposition::Queue)
            }
        }
    }
}

/// Reject changes naming columns the table does not have
fn validate_changes(table: &TableDoc, changes: &RowData) -> Result<()> {
    if changes.is_empty() {
        return Err(LecternError::Validation("no changes submitted".into()));
    }

    for key in changes.keys() {
        if !table.columns.iter().any(|c| c == key) {
            return Err(LecternError::Validation(format!(
                "unknown column: {}",
                key
            )));
        }
    }

    Ok(())
}

/// Create a table definition together with its initial rows.
/// Returns the table id and the number of rows inserted.
pub async fn create_table_with_rows(
    store: &dyn TableStore,
    table: TableDoc,
    rows: Vec<RowData>,
) -> Result<(ObjectId, usize)> {
    let table_id = store.insert_table(table).await?;

    let docs: Vec<RowDoc> = rows.into_iter().map(|d| RowDoc::new(table_id, d)).collect();
    let count = docs.len();
    store.insert_rows(docs).await?;

    info!(table_id = %table_id, rows = count, "Created table");
    Ok((table_id, count))
}

/// Delete a table and its rows.
///
/// Pending change requests against the table are resolved as rejected
/// with a note naming the deletion; already-resolved requests stay
/// untouched as history. Returns the number of rows removed.
pub async fn delete_table(
    store: &dyn TableStore,
    table_id: ObjectId,
    deleted_by: &str,
) -> Result<u64> {
    if store.get_table(table_id).await?.is_none() {
        return Err(LecternError::NotFound("table not found".into()));
    }

    let pending = store
        .list_change_requests(
            ChangeRequestFilter::default()
                .with_status(ChangeStatus::Pending)
                .with_table(table_id),
        )
        .await?;
    for request in &pending {
        let Some(request_id) = request._id else {
            continue;
        };
        let review = Review {
            decision: crate::db::schemas::ReviewDecision::Reject,
            reviewed_by: deleted_by.to_string(),
            notes: Some("table deleted".into()),
        };
        // A concurrent reviewer may have claimed it already; that is fine
        store.claim_pending(request_id, &review).await?;
    }

    let rows_removed = store.soft_delete_rows_for_table(table_id).await?;
    store.soft_delete_table(table_id).await?;

    info!(table_id = %table_id, rows_removed, rejected_pending = pending.len(),
        "Deleted table");
    Ok(rows_removed)
}

/// Submit an edit to one row, routing it per the table's permission mode
pub async fn submit_row_edit(
    store: &dyn TableStore,
    table_id: ObjectId,
    row_id: ObjectId,
    changes: RowData,
    proof_images: Vec<String>,
    editor: &EditorContext,
) -> Result<EditOutcome> {
    let table = store
        .get_table(table_id)
        .await?
        .ok_or_else(|| LecternError::NotFound("table not found".into()))?;

    if !table.active {
        return Err(LecternError::PermissionDenied(
            "table is not accepting edits".into(),
        ));
    }

    validate_changes(&table, &changes)?;
    let disposition = decide_edit(table.permission_mode, proof_images.len())?;

    let row = store
        .get_row(row_id)
        .await?
        .filter(|r| r.table_id == table_id)
        .ok_or_else(|| LecternError::NotFound("row not found".into()))?;
    let row_id = row
        ._id
        .ok_or_else(|| LecternError::Internal("stored row has no id".into()))?;

    match disposition {
        EditDisposition::Direct => {
            let updated = store
                .apply_row_changes(row_id, &changes, &editor.user_id)
                .await?
                .ok_or_else(|| LecternError::NotFound("row not found".into()))?;

            info!(table_id = %table_id, row_id = %row_id, editor = %editor.display_name,
                "Applied direct edit");
            Ok(EditOutcome::Applied(updated))
        }
        EditDisposition::Queue => {
            let mut request = ChangeRequestDoc::new(
                table_id,
                row_id,
                changes,
                proof_images,
                editor.user_id.clone(),
            );
            let request_id = store.insert_change_request(request.clone()).await?;
            request._id = Some(request_id);

            info!(table_id = %table_id, row_id = %row_id, request_id = %request_id,
                editor = %editor.display_name, "Queued change request for review");
            Ok(EditOutcome::Queued(request))
        }
    }
}

/// Resolve a pending change request.
///
/// The claim is atomic: of two concurrent reviewers exactly one wins,
/// the other gets Conflict. On approval the proposed changes are
/// applied to the row; if that apply fails the claim is rolled back so
/// the request stays reviewable.
pub async fn review_change_request(
    store: &dyn TableStore,
    request_id: ObjectId,
    review: Review,
) -> Result<ChangeRequestDoc> {
    let decision = review.decision;

    let Some(claimed) = store.claim_pending(request_id, &review).await? else {
        // Distinguish a lost race from a bad id
        return match store.get_change_request(request_id).await? {
            Some(existing) => Err(LecternError::Conflict(format!(
                "change request already {}",
                existing.status
            ))),
            None => Err(LecternError::NotFound("change request not found".into())),
        };
    };

    if claimed.status == ChangeStatus::Approved {
        let applied = store
            .apply_row_changes(claimed.row_id, &claimed.proposed_changes, &claimed.requested_by)
            .await;

        match applied {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Row vanished between claim and apply; undo the claim
                if let Err(e) = store.reopen_request(request_id).await {
                    warn!(request_id = %request_id, error = %e,
                        "Failed to reopen change request after missing row");
                }
                return Err(LecternError::NotFound(
                    "row for this change request no longer exists".into(),
                ));
            }
            Err(e) => {
                if let Err(reopen_err) = store.reopen_request(request_id).await {
                    warn!(request_id = %request_id, error = %reopen_err,
                        "Failed to reopen change request after apply error");
                }
                return Err(e);
            }
        }
    }

    info!(request_id = %request_id, decision = ?decision, reviewer = %review.reviewed_by,
        "Resolved change request");
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{ReviewDecision, TablePatch};
    use serde_json::json;

    fn editor() -> EditorContext {
        EditorContext {
            user_id: "64f000000000000000000001".into(),
            display_name: "Student A".into(),
        }
    }

    fn reviewer(decision: ReviewDecision) -> Review {
        Review {
            decision,
            reviewed_by: "64f0000000000000000000aa".into(),
            notes: Some("checked against records".into()),
        }
    }

    fn marksheet(mode: PermissionMode) -> TableDoc {
        TableDoc::new(
            "Marksheet".into(),
            Some("Term 1".into()),
            vec!["Name".into(), "Marks".into()],
            mode,
            "admin".into(),
        )
        .unwrap()
    }

    fn changes(pairs: &[(&str, serde_json::Value)]) -> RowData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn seed(
        store: &MemoryTableStore,
        mode: PermissionMode,
    ) -> (ObjectId, ObjectId) {
        let rows = vec![
            changes(&[("Name", json!("A")), ("Marks", json!("80"))]),
            changes(&[("Name", json!("B")), ("Marks", json!("75"))]),
        ];
        let (table_id, _) = create_table_with_rows(store, marksheet(mode), rows)
            .await
            .unwrap();
        let row_id = store.list_rows(table_id).await.unwrap()[0]._id.unwrap();
        (table_id, row_id)
    }

    #[test]
    fn test_decide_edit_modes() {
        assert!(matches!(
            decide_edit(PermissionMode::ViewOnly, 0),
            Err(LecternError::PermissionDenied(_))
        ));
        assert_eq!(
            decide_edit(PermissionMode::Editable, 0).unwrap(),
            EditDisposition::Direct
        );
        assert!(matches!(
            decide_edit(PermissionMode::EditWithProof, 0),
            Err(LecternError::Validation(_))
        ));
        assert_eq!(
            decide_edit(PermissionMode::EditWithProof, 2).unwrap(),
            EditDisposition::Queue
        );
    }

    #[tokio::test]
    async fn test_view_only_rejects_edit() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::ViewOnly).await;

        let result = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec![],
            &editor(),
        )
        .await;

        assert!(matches!(result, Err(LecternError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_editable_applies_directly() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::Editable).await;

        let outcome = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec![],
            &editor(),
        )
        .await
        .unwrap();

        let EditOutcome::Applied(row) = outcome else {
            panic!("expected direct apply");
        };
        assert_eq!(row.data.get("Marks"), Some(&json!("90")));
        // Untouched column survives the merge
        assert_eq!(row.data.get("Name"), Some(&json!("A")));
        assert_eq!(row.last_edited_by.as_deref(), Some("64f000000000000000000001"));
        assert!(row.last_edited_at.is_some());
    }

    #[tokio::test]
    async fn test_proof_mode_requires_proof() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::EditWithProof).await;

        let result = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec![],
            &editor(),
        )
        .await;

        assert!(matches!(result, Err(LecternError::Validation(_))));
    }

    #[tokio::test]
    async fn test_proof_mode_queues_and_leaves_row_untouched() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::EditWithProof).await;

        let outcome = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec!["https://proof.example/marks.png".into()],
            &editor(),
        )
        .await
        .unwrap();

        let EditOutcome::Queued(request) = outcome else {
            panic!("expected queued request");
        };
        assert_eq!(request.status, ChangeStatus::Pending);
        assert_eq!(request.row_id, row_id);

        // Row still carries the original value
        let row = store.get_row(row_id).await.unwrap().unwrap();
        assert_eq!(row.data.get("Marks"), Some(&json!("80")));
        assert!(row.last_edited_by.is_none());
    }

    #[tokio::test]
    async fn test_approve_applies_changes() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::EditWithProof).await;

        let outcome = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec!["https://proof.example/marks.png".into()],
            &editor(),
        )
        .await
        .unwrap();
        let EditOutcome::Queued(request) = outcome else {
            panic!("expected queued request");
        };

        let resolved =
            review_change_request(&store, request._id.unwrap(), reviewer(ReviewDecision::Approve))
                .await
                .unwrap();
        assert_eq!(resolved.status, ChangeStatus::Approved);
        assert!(resolved.reviewed_at.is_some());

        let row = store.get_row(row_id).await.unwrap().unwrap();
        assert_eq!(row.data.get("Marks"), Some(&json!("90")));
        // Edit trail credits the requester, not the reviewer
        assert_eq!(row.last_edited_by.as_deref(), Some("64f000000000000000000001"));
    }

    #[tokio::test]
    async fn test_reject_leaves_row_untouched() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::EditWithProof).await;

        let outcome = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec!["https://proof.example/marks.png".into()],
            &editor(),
        )
        .await
        .unwrap();
        let EditOutcome::Queued(request) = outcome else {
            panic!("expected queued request");
        };

        let resolved =
            review_change_request(&store, request._id.unwrap(), reviewer(ReviewDecision::Reject))
                .await
                .unwrap();
        assert_eq!(resolved.status, ChangeStatus::Rejected);

        let row = store.get_row(row_id).await.unwrap().unwrap();
        assert_eq!(row.data.get("Marks"), Some(&json!("80")));
    }

    #[tokio::test]
    async fn test_double_review_conflicts() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::EditWithProof).await;

        let outcome = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec!["https://proof.example/marks.png".into()],
            &editor(),
        )
        .await
        .unwrap();
        let EditOutcome::Queued(request) = outcome else {
            panic!("expected queued request");
        };
        let request_id = request._id.unwrap();

        review_change_request(&store, request_id, reviewer(ReviewDecision::Reject))
            .await
            .unwrap();

        // Second resolution loses, row stays as the first verdict left it
        let second =
            review_change_request(&store, request_id, reviewer(ReviewDecision::Approve)).await;
        assert!(matches!(second, Err(LecternError::Conflict(_))));

        let row = store.get_row(row_id).await.unwrap().unwrap();
        assert_eq!(row.data.get("Marks"), Some(&json!("80")));
    }

    #[tokio::test]
    async fn test_approve_missing_row_reopens_request() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::EditWithProof).await;

        let outcome = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec!["https://proof.example/marks.png".into()],
            &editor(),
        )
        .await
        .unwrap();
        let EditOutcome::Queued(request) = outcome else {
            panic!("expected queued request");
        };
        let request_id = request._id.unwrap();

        store.soft_delete_row(row_id).await.unwrap();

        let result =
            review_change_request(&store, request_id, reviewer(ReviewDecision::Approve)).await;
        assert!(matches!(result, Err(LecternError::NotFound(_))));

        // Claim rolled back, request reviewable again
        let request = store.get_change_request(request_id).await.unwrap().unwrap();
        assert_eq!(request.status, ChangeStatus::Pending);
        assert!(request.reviewed_by.is_none());
    }

    #[tokio::test]
    async fn test_unknown_column_rejected() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::Editable).await;

        let result = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Grade", json!("A+"))]),
            vec![],
            &editor(),
        )
        .await;

        assert!(matches!(result, Err(LecternError::Validation(_))));
    }

    #[tokio::test]
    async fn test_row_from_other_table_not_found() {
        let store = MemoryTableStore::new();
        let (_, row_id) = seed(&store, PermissionMode::Editable).await;
        let (other_table, _) = seed(&store, PermissionMode::Editable).await;

        let result = submit_row_edit(
            &store,
            other_table,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec![],
            &editor(),
        )
        .await;

        assert!(matches!(result, Err(LecternError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inactive_table_rejects_edit() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::Editable).await;

        store
            .update_table(
                table_id,
                TablePatch {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec![],
            &editor(),
        )
        .await;

        assert!(matches!(result, Err(LecternError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_delete_table_rejects_pending_requests() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::EditWithProof).await;

        let outcome = submit_row_edit(
            &store,
            table_id,
            row_id,
            changes(&[("Marks", json!("90"))]),
            vec!["https://proof.example/marks.png".into()],
            &editor(),
        )
        .await
        .unwrap();
        let EditOutcome::Queued(request) = outcome else {
            panic!("expected queued request");
        };

        delete_table(&store, table_id, "admin-1").await.unwrap();

        // The pending request became part of the audit trail, rejected
        let request = store
            .get_change_request(request._id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, ChangeStatus::Rejected);
        assert_eq!(request.reviewed_by.as_deref(), Some("admin-1"));
        assert_eq!(request.review_notes.as_deref(), Some("table deleted"));
    }

    #[tokio::test]
    async fn test_delete_table_removes_rows() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::Editable).await;

        let removed = delete_table(&store, table_id, "admin-1").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_table(table_id).await.unwrap().is_none());
        assert!(store.get_row(row_id).await.unwrap().is_none());
        assert!(store.list_rows(table_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_lists_pending_only() {
        let store = MemoryTableStore::new();
        let (table_id, row_id) = seed(&store, PermissionMode::EditWithProof).await;

        for marks in ["85", "90"] {
            submit_row_edit(
                &store,
                table_id,
                row_id,
                changes(&[("Marks", json!(marks))]),
                vec!["https://proof.example/marks.png".into()],
                &editor(),
            )
            .await
            .unwrap();
        }

        let pending = store
            .list_change_requests(
                ChangeRequestFilter::default().with_status(ChangeStatus::Pending),
            )
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);

        review_change_request(
            &store,
            pending[0]._id.unwrap(),
            reviewer(ReviewDecision::Approve),
        )
        .await
        .unwrap();

        let pending = store
            .list_change_requests(
                ChangeRequestFilter::default()
                    .with_status(ChangeStatus::Pending)
                    .with_table(table_id),
            )
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}
