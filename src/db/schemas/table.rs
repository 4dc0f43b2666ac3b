//! Table definition document schema
//!
//! A table definition carries the metadata for one user-defined
//! information table: its title, ordered column names, and the
//! permission mode that drives the change-control workflow.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{LecternError, Result};

/// Collection name for table definitions
pub const TABLE_COLLECTION: &str = "tables";

/// How edits to the table's rows are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// No edits allowed
    #[default]
    ViewOnly,
    /// Edits apply directly to the row
    Editable,
    /// Edits require proof attachments and administrator review
    EditWithProof,
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionMode::ViewOnly => write!(f, "view-only"),
            PermissionMode::Editable => write!(f, "editable"),
            PermissionMode::EditWithProof => write!(f, "edit-with-proof"),
        }
    }
}

/// Table definition document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TableDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Display title
    pub title: String,

    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordered column names; order defines CSV column order
    pub columns: Vec<String>,

    /// Edit permission mode
    #[serde(default)]
    pub permission_mode: PermissionMode,

    /// Whether the table is shown in the portal
    #[serde(default = "default_true")]
    pub active: bool,

    /// User id of the creator
    pub created_by: String,
}

fn default_true() -> bool {
    true
}

impl TableDoc {
    /// Create a new table definition. Fails when the title is empty,
    /// the column list is empty, or column names repeat.
    pub fn new(
        title: String,
        description: Option<String>,
        columns: Vec<String>,
        permission_mode: PermissionMode,
        created_by: String,
    ) -> Result<Self> {
        if title.trim().is_empty() {
            return Err(LecternError::Validation("title must not be empty".into()));
        }
        validate_columns(&columns)?;

        Ok(Self {
            _id: None,
            metadata: Metadata::new(),
            title,
            description,
            columns,
            permission_mode,
            active: true,
            created_by,
        })
    }
}

/// Check the column-list invariant: non-empty, unique names
pub fn validate_columns(columns: &[String]) -> Result<()> {
    if columns.is_empty() {
        return Err(LecternError::Validation(
            "column list must not be empty".into(),
        ));
    }

    let mut seen = HashSet::new();
    for column in columns {
        if column.trim().is_empty() {
            return Err(LecternError::Validation(
                "column names must not be empty".into(),
            ));
        }
        if !seen.insert(column.as_str()) {
            return Err(LecternError::Validation(format!(
                "duplicate column name: {}",
                column
            )));
        }
    }

    Ok(())
}

/// Mutable-field subset accepted by table updates
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    pub active: Option<bool>,
}

impl TablePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.permission_mode.is_none()
            && self.active.is_none()
    }
}

impl IntoIndexes for TableDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "metadata.created_at": -1 },
            Some(
                IndexOptions::builder()
                    .name("created_at_desc".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for TableDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_permission_mode_wire_format() {
        assert_eq!(
            serde_json::to_string(&PermissionMode::ViewOnly).unwrap(),
            "\"view-only\""
        );
        assert_eq!(
            serde_json::to_string(&PermissionMode::EditWithProof).unwrap(),
            "\"edit-with-proof\""
        );
        let mode: PermissionMode = serde_json::from_str("\"editable\"").unwrap();
        assert_eq!(mode, PermissionMode::Editable);
    }

    #[test]
    fn test_new_rejects_empty_title() {
        let result = TableDoc::new(
            "  ".into(),
            None,
            columns(&["Name"]),
            PermissionMode::Editable,
            "admin".into(),
        );
        assert!(matches!(result, Err(LecternError::Validation(_))));
    }

    #[test]
    fn test_new_rejects_empty_columns() {
        let result = TableDoc::new(
            "Marksheet".into(),
            None,
            vec![],
            PermissionMode::Editable,
            "admin".into(),
        );
        assert!(matches!(result, Err(LecternError::Validation(_))));
    }

    #[test]
    fn test_new_rejects_duplicate_columns() {
        let result = TableDoc::new(
            "Marksheet".into(),
            None,
            columns(&["Name", "Marks", "Name"]),
            PermissionMode::Editable,
            "admin".into(),
        );
        assert!(matches!(result, Err(LecternError::Validation(_))));
    }

    #[test]
    fn test_new_table_is_active() {
        let table = TableDoc::new(
            "Marksheet".into(),
            Some("Term 1".into()),
            columns(&["Name", "Marks"]),
            PermissionMode::EditWithProof,
            "admin".into(),
        )
        .unwrap();
        assert!(table.active);
        assert_eq!(table.columns, columns(&["Name", "Marks"]));
    }
}
