//! Database schemas for Lectern
//!
//! Defines MongoDB document structures for users, table definitions,
//! rows, and change requests.

mod change_request;
mod metadata;
mod row;
mod table;
mod user;

pub use change_request::{
    ChangeRequestDoc, ChangeStatus, Review, ReviewDecision, CHANGE_REQUEST_COLLECTION,
};
pub use metadata::Metadata;
pub use row::{RowData, RowDoc, ROW_COLLECTION};
pub use table::{validate_columns, PermissionMode, TableDoc, TablePatch, TABLE_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
