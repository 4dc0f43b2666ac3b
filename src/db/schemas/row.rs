//! Row document schema
//!
//! A row holds one record of an information table as an open mapping
//! from column name to scalar value. Values are not schema-typed; the
//! CSV codec renders them as text on export.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for rows
pub const ROW_COLLECTION: &str = "rows";

/// Column name to scalar value mapping. BTreeMap keeps key order
/// deterministic; display order always comes from the table's columns.
pub type RowData = BTreeMap<String, serde_json::Value>;

/// Row document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RowDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning table definition
    pub table_id: ObjectId,

    /// Column name to value mapping
    #[serde(default)]
    pub data: RowData,

    /// User id of the last editor, when the row has been edited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_edited_by: Option<String>,

    /// When the row was last edited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_edited_at: Option<DateTime>,
}

impl RowDoc {
    /// Create a new row for a table
    pub fn new(table_id: ObjectId, data: RowData) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            table_id,
            data,
            last_edited_by: None,
            last_edited_at: None,
        }
    }
}

impl IntoIndexes for RowDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "table_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("table_id_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for RowDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_row_has_no_edit_trail() {
        let mut data = RowData::new();
        data.insert("Name".into(), json!("A"));
        let row = RowDoc::new(ObjectId::new(), data);

        assert!(row.last_edited_by.is_none());
        assert!(row.last_edited_at.is_none());
        assert_eq!(row.data.get("Name"), Some(&json!("A")));
    }
}
