//! MongoDB-backed implementation of the table store

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, to_bson, DateTime};

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    ChangeRequestDoc, ChangeStatus, Review, RowData, RowDoc, TableDoc, TablePatch,
    CHANGE_REQUEST_COLLECTION, ROW_COLLECTION, TABLE_COLLECTION,
};
use crate::types::{LecternError, Result};
use crate::workflow::store::{ChangeRequestFilter, TableStore};

/// Production store backed by the portal's MongoDB collections
#[derive(Clone)]
pub struct MongoTableStore {
    tables: MongoCollection<TableDoc>,
    rows: MongoCollection<RowDoc>,
    change_requests: MongoCollection<ChangeRequestDoc>,
}

impl MongoTableStore {
    /// Open the three workflow collections and apply their indexes
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            tables: client.collection(TABLE_COLLECTION).await?,
            rows: client.collection(ROW_COLLECTION).await?,
            change_requests: client.collection(CHANGE_REQUEST_COLLECTION).await?,
        })
    }
}

fn changes_to_set_doc(changes: &RowData) -> Result<bson::Document> {
    let mut set = doc! {};
    for (key, value) in changes {
        let bson_value = to_bson(value)
            .map_err(|e| LecternError::Database(format!("Invalid row value: {}", e)))?;
        set.insert(format!("data.{}", key), bson_value);
    }
    Ok(set)
}

#[async_trait]
impl TableStore for MongoTableStore {
    async fn insert_table(&self, table: TableDoc) -> Result<ObjectId> {
        self.tables.insert_one(table).await
    }

    async fn get_table(&self, id: ObjectId) -> Result<Option<TableDoc>> {
        self.tables.find_one(doc! { "_id": id }).await
    }

    async fn list_tables(&self) -> Result<Vec<TableDoc>> {
        self.tables
            .find_many(doc! {}, Some(doc! { "metadata.created_at": -1 }))
            .await
    }

    async fn update_table(&self, id: ObjectId, patch: TablePatch) -> Result<Option<TableDoc>> {
        let mut set = doc! { "metadata.updated_at": DateTime::now() };
        if let Some(title) = patch.title {
            set.insert("title", title);
        }
        if let Some(description) = patch.description {
            set.insert("description", description);
        }
        if let Some(mode) = patch.permission_mode {
            set.insert("permission_mode", mode.to_string());
        }
        if let Some(active) = patch.active {
            set.insert("active", active);
        }

        self.tables
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .await
    }

    async fn soft_delete_table(&self, id: ObjectId) -> Result<bool> {
        let result = self.tables.soft_delete(doc! { "_id": id }).await?;
        Ok(result.modified_count > 0)
    }

    async fn insert_rows(&self, rows: Vec<RowDoc>) -> Result<Vec<ObjectId>> {
        self.rows.insert_many(rows).await
    }

    async fn get_row(&self, id: ObjectId) -> Result<Option<RowDoc>> {
        self.rows.find_one(doc! { "_id": id }).await
    }

    async fn list_rows(&self, table_id: ObjectId) -> Result<Vec<RowDoc>> {
        self.rows
            .find_many(
                doc! { "table_id": table_id },
                Some(doc! { "metadata.created_at": 1 }),
            )
            .await
    }

    async fn apply_row_changes(
        &self,
        id: ObjectId,
        changes: &RowData,
        edited_by: &str,
    ) -> Result<Option<RowDoc>> {
        let mut set = changes_to_set_doc(changes)?;
        set.insert("last_edited_by", edited_by);
        set.insert("last_edited_at", DateTime::now());
        set.insert("metadata.updated_at", DateTime::now());

        self.rows
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .await
    }

    async fn soft_delete_row(&self, id: ObjectId) -> Result<bool> {
        let result = self.rows.soft_delete(doc! { "_id": id }).await?;
        Ok(result.modified_count > 0)
    }

    async fn soft_delete_rows_for_table(&self, table_id: ObjectId) -> Result<u64> {
        self.rows
            .soft_delete_many(doc! {
                "table_id": table_id,
                "metadata.is_deleted": { "$ne": true },
            })
            .await
    }

    async fn insert_change_request(&self, request: ChangeRequestDoc) -> Result<ObjectId> {
        self.change_requests.insert_one(request).await
    }

    async fn get_change_request(&self, id: ObjectId) -> Result<Option<ChangeRequestDoc>> {
        self.change_requests.find_one(doc! { "_id": id }).await
    }

    async fn list_change_requests(
        &self,
        filter: ChangeRequestFilter,
    ) -> Result<Vec<ChangeRequestDoc>> {
        self.change_requests
            .find_many(filter.to_document(), Some(doc! { "metadata.created_at": 1 }))
            .await
    }

    async fn claim_pending(
        &self,
        id: ObjectId,
        review: &Review,
    ) -> Result<Option<ChangeRequestDoc>> {
        // The status filter makes the transition atomic: a concurrent
        // reviewer who already resolved the request leaves nothing to match.
        let filter = doc! {
            "_id": id,
            "status": ChangeStatus::Pending.to_string(),
        };

        let mut set = doc! {
            "status": review.decision.terminal_status().to_string(),
            "reviewed_by": review.reviewed_by.as_str(),
            "reviewed_at": DateTime::now(),
            "metadata.updated_at": DateTime::now(),
        };
        if let Some(notes) = &review.notes {
            set.insert("review_notes", notes.as_str());
        }

        self.change_requests
            .find_one_and_update(filter, doc! { "$set": set })
            .await
    }

    async fn reopen_request(&self, id: ObjectId) -> Result<bool> {
        let result = self
            .change_requests
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$set": {
                        "status": ChangeStatus::Pending.to_string(),
                        "metadata.updated_at": DateTime::now(),
                    },
                    "$unset": {
                        "reviewed_by": "",
                        "reviewed_at": "",
                        "review_notes": "",
                    },
                },
            )
            .await?;
        Ok(result.modified_count > 0)
    }
}
