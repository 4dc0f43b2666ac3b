//! Persistence seam for the change-control workflow
//!
//! `TableStore` abstracts the document operations the workflow needs so
//! the portal can run against MongoDB in production and an in-memory
//! store in dev mode and tests.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime, Document};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::db::schemas::{
    ChangeRequestDoc, ChangeStatus, Review, RowData, RowDoc, TableDoc, TablePatch,
};
use crate::types::Result;

/// Explicit filter for change-request listings. Unset fields match
/// everything; set fields must all match.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeRequestFilter {
    pub status: Option<ChangeStatus>,
    pub table_id: Option<ObjectId>,
}

impl ChangeRequestFilter {
    pub fn with_status(mut self, status: ChangeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_table(mut self, table_id: ObjectId) -> Self {
        self.table_id = Some(table_id);
        self
    }

    pub fn matches(&self, request: &ChangeRequestDoc) -> bool {
        self.status.map_or(true, |s| request.status == s)
            && self.table_id.map_or(true, |t| request.table_id == t)
    }

    pub fn to_document(&self) -> Document {
        let mut filter = doc! {};
        if let Some(status) = self.status {
            filter.insert("status", status.to_string());
        }
        if let Some(table_id) = self.table_id {
            filter.insert("table_id", table_id);
        }
        filter
    }
}

/// Document operations backing the table workflow
#[async_trait]
pub trait TableStore: Send + Sync {
    // Table definitions
    async fn insert_table(&self, table: TableDoc) -> Result<ObjectId>;
    async fn get_table(&self, id: ObjectId) -> Result<Option<TableDoc>>;
    async fn list_tables(&self) -> Result<Vec<TableDoc>>;
    async fn update_table(&self, id: ObjectId, patch: TablePatch) -> Result<Option<TableDoc>>;
    async fn soft_delete_table(&self, id: ObjectId) -> Result<bool>;

    // Rows
    async fn insert_rows(&self, rows: Vec<RowDoc>) -> Result<Vec<ObjectId>>;
    async fn get_row(&self, id: ObjectId) -> Result<Option<RowDoc>>;
    async fn list_rows(&self, table_id: ObjectId) -> Result<Vec<RowDoc>>;
    /// Merge `changes` into the row's data and stamp the edit trail.
    /// Returns the updated row, or None when the row does not exist.
    async fn apply_row_changes(
        &self,
        id: ObjectId,
        changes: &RowData,
        edited_by: &str,
    ) -> Result<Option<RowDoc>>;
    async fn soft_delete_row(&self, id: ObjectId) -> Result<bool>;
    async fn soft_delete_rows_for_table(&self, table_id: ObjectId) -> Result<u64>;

    // Change requests
    async fn insert_change_request(&self, request: ChangeRequestDoc) -> Result<ObjectId>;
    async fn get_change_request(&self, id: ObjectId) -> Result<Option<ChangeRequestDoc>>;
    async fn list_change_requests(
        &self,
        filter: ChangeRequestFilter,
    ) -> Result<Vec<ChangeRequestDoc>>;
    /// Atomically move a pending request to the review's terminal status.
    /// Returns None when the request is missing or no longer pending,
    /// which is how a concurrent double review is detected.
    async fn claim_pending(
        &self,
        id: ObjectId,
        review: &Review,
    ) -> Result<Option<ChangeRequestDoc>>;
    /// Return a claimed request to pending, clearing the review fields.
    /// Used to roll back a claim whose row apply failed.
    async fn reopen_request(&self, id: ObjectId) -> Result<bool>;
}

/// In-memory store for dev mode and tests
#[derive(Default)]
pub struct MemoryTableStore {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<ObjectId, TableDoc>,
    rows: HashMap<ObjectId, RowDoc>,
    change_requests: HashMap<ObjectId, ChangeRequestDoc>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stamp_new(metadata: &mut crate::db::schemas::Metadata) {
    metadata.is_deleted = false;
    metadata.created_at = Some(DateTime::now());
    metadata.updated_at = Some(DateTime::now());
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn insert_table(&self, mut table: TableDoc) -> Result<ObjectId> {
        let id = ObjectId::new();
        table._id = Some(id);
        stamp_new(&mut table.metadata);
        self.inner.write().await.tables.insert(id, table);
        Ok(id)
    }

    async fn get_table(&self, id: ObjectId) -> Result<Option<TableDoc>> {
        let state = self.inner.read().await;
        Ok(state
            .tables
            .get(&id)
            .filter(|t| !t.metadata.is_deleted)
            .cloned())
    }

    async fn list_tables(&self) -> Result<Vec<TableDoc>> {
        let state = self.inner.read().await;
        let mut tables: Vec<TableDoc> = state
            .tables
            .values()
            .filter(|t| !t.metadata.is_deleted)
            .cloned()
            .collect();
        // Newest first, matching the MongoDB sort; _id breaks
        // same-millisecond timestamp ties
        tables.sort_by(|a, b| {
            b.metadata
                .created_at
                .cmp(&a.metadata.created_at)
                .then(b._id.cmp(&a._id))
        });
        Ok(tables)
    }

    async fn update_table(&self, id: ObjectId, patch: TablePatch) -> Result<Option<TableDoc>> {
        let mut state = self.inner.write().await;
        let Some(table) = state.tables.get_mut(&id).filter(|t| !t.metadata.is_deleted) else {
            return Ok(None);
        };

        if let Some(title) = patch.title {
            table.title = title;
        }
        if let Some(description) = patch.description {
            table.description = Some(description);
        }
        if let Some(mode) = patch.permission_mode {
            table.permission_mode = mode;
        }
        if let Some(active) = patch.active {
            table.active = active;
        }
        table.metadata.updated_at = Some(DateTime::now());

        Ok(Some(table.clone()))
    }

    async fn soft_delete_table(&self, id: ObjectId) -> Result<bool> {
        let mut state = self.inner.write().await;
        match state.tables.get_mut(&id).filter(|t| !t.metadata.is_deleted) {
            Some(table) => {
                table.metadata.is_deleted = true;
                table.metadata.deleted_at = Some(DateTime::now());
                table.metadata.updated_at = Some(DateTime::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_rows(&self, rows: Vec<RowDoc>) -> Result<Vec<ObjectId>> {
        let mut state = self.inner.write().await;
        let mut ids = Vec::with_capacity(rows.len());
        for mut row in rows {
            let id = ObjectId::new();
            row._id = Some(id);
            stamp_new(&mut row.metadata);
            state.rows.insert(id, row);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_row(&self, id: ObjectId) -> Result<Option<RowDoc>> {
        let state = self.inner.read().await;
        Ok(state
            .rows
            .get(&id)
            .filter(|r| !r.metadata.is_deleted)
            .cloned())
    }

    async fn list_rows(&self, table_id: ObjectId) -> Result<Vec<RowDoc>> {
        let state = self.inner.read().await;
        let mut rows: Vec<RowDoc> = state
            .rows
            .values()
            .filter(|r| r.table_id == table_id && !r.metadata.is_deleted)
            .cloned()
            .collect();
        // Insertion order, matching the MongoDB sort; _id breaks
        // same-millisecond timestamp ties
        rows.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then(a._id.cmp(&b._id))
        });
        Ok(rows)
    }

    async fn apply_row_changes(
        &self,
        id: ObjectId,
        changes: &RowData,
        edited_by: &str,
    ) -> Result<Option<RowDoc>> {
        let mut state = self.inner.write().await;
        let Some(row) = state.rows.get_mut(&id).filter(|r| !r.metadata.is_deleted) else {
            return Ok(None);
        };

        for (key, value) in changes {
            row.data.insert(key.clone(), value.clone());
        }
        row.last_edited_by = Some(edited_by.to_string());
        row.last_edited_at = Some(DateTime::now());
        row.metadata.updated_at = Some(DateTime::now());

        Ok(Some(row.clone()))
    }

    async fn soft_delete_row(&self, id: ObjectId) -> Result<bool> {
        let mut state = self.inner.write().await;
        match state.rows.get_mut(&id).filter(|r| !r.metadata.is_deleted) {
            Some(row) => {
                row.metadata.is_deleted = true;
                row.metadata.deleted_at = Some(DateTime::now());
                row.metadata.updated_at = Some(DateTime::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn soft_delete_rows_for_table(&self, table_id: ObjectId) -> Result<u64> {
        let mut state = self.inner.write().await;
        let mut count = 0;
        for row in state.rows.values_mut() {
            if row.table_id == table_id && !row.metadata.is_deleted {
                row.metadata.is_deleted = true;
                row.metadata.deleted_at = Some(DateTime::now());
                row.metadata.updated_at = Some(DateTime::now());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert_change_request(&self, mut request: ChangeRequestDoc) -> Result<ObjectId> {
        let id = ObjectId::new();
        request._id = Some(id);
        stamp_new(&mut request.metadata);
        self.inner.write().await.change_requests.insert(id, request);
        Ok(id)
    }

    async fn get_change_request(&self, id: ObjectId) -> Result<Option<ChangeRequestDoc>> {
        let state = self.inner.read().await;
        Ok(state
            .change_requests
            .get(&id)
            .filter(|c| !c.metadata.is_deleted)
            .cloned())
    }

    async fn list_change_requests(
        &self,
        filter: ChangeRequestFilter,
    ) -> Result<Vec<ChangeRequestDoc>> {
        let state = self.inner.read().await;
        let mut requests: Vec<ChangeRequestDoc> = state
            .change_requests
            .values()
            .filter(|c| !c.metadata.is_deleted && filter.matches(c))
            .cloned()
            .collect();
        // Oldest pending first, review queue order; _id breaks
        // same-millisecond timestamp ties
        requests.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then(a._id.cmp(&b._id))
        });
        Ok(requests)
    }

    async fn claim_pending(
        &self,
        id: ObjectId,
        review: &Review,
    ) -> Result<Option<ChangeRequestDoc>> {
        let mut state = self.inner.write().await;
        let Some(request) = state
            .change_requests
            .get_mut(&id)
            .filter(|c| !c.metadata.is_deleted && c.status == ChangeStatus::Pending)
        else {
            return Ok(None);
        };

        request.status = review.decision.terminal_status();
        request.reviewed_by = Some(review.reviewed_by.clone());
        request.reviewed_at = Some(DateTime::now());
        request.review_notes = review.notes.clone();
        request.metadata.updated_at = Some(DateTime::now());

        Ok(Some(request.clone()))
    }

    async fn reopen_request(&self, id: ObjectId) -> Result<bool> {
        let mut state = self.inner.write().await;
        match state
            .change_requests
            .get_mut(&id)
            .filter(|c| !c.metadata.is_deleted)
        {
            Some(request) => {
                request.status = ChangeStatus::Pending;
                request.reviewed_by = None;
                request.reviewed_at = None;
                request.review_notes = None;
                request.metadata.updated_at = Some(DateTime::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
