//! HTTP routes for information tables
//!
//! - GET    /tables                     - list table definitions
//! - POST   /tables                     - create a table with initial rows (admin)
//! - PUT    /tables/{id}                - update mutable fields (admin)
//! - DELETE /tables/{id}                - cascading delete (admin)
//! - GET    /tables/{id}/rows           - table definition plus rows
//! - PUT    /tables/{id}/rows/{rowId}   - submit a row edit
//! - DELETE /tables/{id}/rows?rowId=    - delete one row (admin)
//! - GET    /tables/{id}/export         - CSV download

use bson::oid::ObjectId;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

use crate::csv;
use crate::db::schemas::{PermissionMode, RowData, RowDoc, TableDoc, TablePatch};
use crate::notify::{spawn_broadcast, TableCreatedEvent};
use crate::routes::change_requests::ChangeRequestView;
use crate::routes::{
    authenticate, cors_preflight, error_response, full_body, json_response, parse_json_body,
    require_operation, BoxBody, ErrorResponse,
};
use crate::server::AppState;
use crate::types::LecternError;
use crate::workflow::{self, EditOutcome, EditorContext};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<RowData>,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowEditRequest {
    pub data: RowData,
    #[serde(default)]
    pub proof_images: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<String>,
    pub permission_mode: PermissionMode,
    pub active: bool,
    pub created_by: String,
    /// Creator display name when the user record still resolves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl TableSummary {
    fn from_doc(table: &TableDoc, creator_name: Option<String>) -> Self {
        Self {
            id: table._id.map(|id| id.to_hex()).unwrap_or_default(),
            title: table.title.clone(),
            description: table.description.clone(),
            columns: table.columns.clone(),
            permission_mode: table.permission_mode,
            active: table.active,
            created_by: table.created_by.clone(),
            created_by_name: creator_name,
            created_at: table
                .metadata
                .created_at
                .map(|d| d.to_chrono().to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub id: String,
    pub data: RowData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_edited_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_edited_at: Option<String>,
}

impl RowView {
    pub fn from_doc(row: &RowDoc) -> Self {
        Self {
            id: row._id.map(|id| id.to_hex()).unwrap_or_default(),
            data: row.data.clone(),
            last_edited_by: row.last_edited_by.clone(),
            last_edited_at: row.last_edited_at.map(|d| d.to_chrono().to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTableResponse {
    table: TableSummary,
    row_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableRowsResponse {
    table: TableSummary,
    rows: Vec<RowView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteTableResponse {
    message: String,
    rows_removed: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AppliedEditResponse {
    row: RowView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueuedEditResponse {
    change_request: ChangeRequestView,
    requires_approval: bool,
}

fn parse_object_id(raw: &str) -> Result<ObjectId, LecternError> {
    ObjectId::parse_str(raw)
        .map_err(|_| LecternError::Validation(format!("invalid id: {}", raw)))
}

/// Resolve creator ids to display names, one lookup per distinct id
async fn creator_names(state: &AppState, tables: &[TableDoc]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for table in tables {
        if names.contains_key(&table.created_by) {
            continue;
        }
        let Ok(id) = ObjectId::parse_str(&table.created_by) else {
            continue;
        };
        match state.users.find_by_id(id).await {
            Ok(Some(user)) => {
                names.insert(table.created_by.clone(), user.display_name);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to resolve creator name"),
        }
    }
    names
}

/// GET /tables
async fn handle_list(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "table_list") {
        return error_response(&e);
    }

    let tables = match state.store.list_tables().await {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    let names = creator_names(&state, &tables).await;
    let summaries: Vec<TableSummary> = tables
        .iter()
        .map(|t| TableSummary::from_doc(t, names.get(&t.created_by).cloned()))
        .collect();

    json_response(StatusCode::OK, &summaries)
}

/// POST /tables
async fn handle_create(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "table_create") {
        return error_response(&e);
    }

    let body: CreateTableRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    if body.rows.is_empty() {
        return error_response(&LecternError::Validation(
            "at least one row is required".into(),
        ));
    }

    let table = match TableDoc::new(
        body.title,
        body.description,
        body.columns,
        body.permission_mode.unwrap_or_default(),
        claims.user_id.clone(),
    ) {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    // Row keys must name columns the table defines
    for row in &body.rows {
        for key in row.keys() {
            if !table.columns.iter().any(|c| c == key) {
                return error_response(&LecternError::Validation(format!(
                    "unknown column: {}",
                    key
                )));
            }
        }
    }

    let broadcast_table = table.clone();
    let (table_id, row_count) =
        match workflow::create_table_with_rows(state.store.as_ref(), table, body.rows).await {
            Ok(result) => result,
            Err(e) => return error_response(&e),
        };

    spawn_broadcast(
        state.notifier.clone(),
        TableCreatedEvent::new(&table_id, &broadcast_table),
    );

    let stored = match state.store.get_table(table_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return error_response(&LecternError::Internal("table vanished".into())),
        Err(e) => return error_response(&e),
    };

    json_response(
        StatusCode::CREATED,
        &CreateTableResponse {
            table: TableSummary::from_doc(&stored, Some(claims.display_name)),
            row_count,
        },
    )
}

/// PUT /tables/{id}
async fn handle_update(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    table_id: &str,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "table_update") {
        return error_response(&e);
    }

    let table_id = match parse_object_id(table_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let patch: TablePatch = match parse_json_body(req).await {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    if patch.is_empty() {
        return error_response(&LecternError::Validation("no fields to update".into()));
    }

    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return error_response(&LecternError::Validation("title must not be empty".into()));
        }
    }

    match state.store.update_table(table_id, patch).await {
        Ok(Some(table)) => {
            json_response(StatusCode::OK, &TableSummary::from_doc(&table, None))
        }
        Ok(None) => error_response(&LecternError::NotFound("table not found".into())),
        Err(e) => error_response(&e),
    }
}

/// DELETE /tables/{id}
async fn handle_delete(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    table_id: &str,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "table_delete") {
        return error_response(&e);
    }

    let table_id = match parse_object_id(table_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    match workflow::delete_table(state.store.as_ref(), table_id, &claims.user_id).await {
        Ok(rows_removed) => json_response(
            StatusCode::OK,
            &DeleteTableResponse {
                message: "Table deleted".into(),
                rows_removed,
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /tables/{id}/rows
async fn handle_rows(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    table_id: &str,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "table_rows") {
        return error_response(&e);
    }

    let table_id = match parse_object_id(table_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let table = match state.store.get_table(table_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return error_response(&LecternError::NotFound("table not found".into())),
        Err(e) => return error_response(&e),
    };

    let rows = match state.store.list_rows(table_id).await {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    json_response(
        StatusCode::OK,
        &TableRowsResponse {
            table: TableSummary::from_doc(&table, None),
            rows: rows.iter().map(RowView::from_doc).collect(),
        },
    )
}

/// PUT /tables/{id}/rows/{rowId}
async fn handle_row_edit(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    table_id: &str,
    row_id: &str,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "row_edit") {
        return error_response(&e);
    }

    let table_id = match parse_object_id(table_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };
    let row_id = match parse_object_id(row_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let body: RowEditRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let editor = EditorContext {
        user_id: claims.user_id,
        display_name: claims.display_name,
    };

    let outcome = match workflow::submit_row_edit(
        state.store.as_ref(),
        table_id,
        row_id,
        body.data,
        body.proof_images,
        &editor,
    )
    .await
    {
        Ok(o) => o,
        Err(e) => return error_response(&e),
    };

    match outcome {
        EditOutcome::Applied(row) => json_response(
            StatusCode::OK,
            &AppliedEditResponse {
                row: RowView::from_doc(&row),
            },
        ),
        EditOutcome::Queued(request) => json_response(
            StatusCode::CREATED,
            &QueuedEditResponse {
                change_request: ChangeRequestView::from_doc(&request),
                requires_approval: true,
            },
        ),
    }
}

/// DELETE /tables/{id}/rows?rowId=
async fn handle_row_delete(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    table_id: &str,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "row_delete") {
        return error_response(&e);
    }

    let table_id = match parse_object_id(table_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let Some(row_id_raw) = query_param(req.uri().query(), "rowId") else {
        return error_response(&LecternError::Validation(
            "rowId query parameter is required".into(),
        ));
    };
    let row_id = match parse_object_id(&row_id_raw) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    // The row must belong to the table named in the path
    let row = match state.store.get_row(row_id).await {
        Ok(r) => r.filter(|r| r.table_id == table_id),
        Err(e) => return error_response(&e),
    };
    if row.is_none() {
        return error_response(&LecternError::NotFound("row not found".into()));
    }

    match state.store.soft_delete_row(row_id).await {
        Ok(true) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "message": "Row deleted" }),
        ),
        Ok(false) => error_response(&LecternError::NotFound("row not found".into())),
        Err(e) => error_response(&e),
    }
}

/// GET /tables/{id}/export
async fn handle_export(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    table_id: &str,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "table_export") {
        return error_response(&e);
    }

    let table_id = match parse_object_id(table_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let table = match state.store.get_table(table_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return error_response(&LecternError::NotFound("table not found".into())),
        Err(e) => return error_response(&e),
    };

    let rows = match state.store.list_rows(table_id).await {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    let text_rows: Vec<BTreeMap<String, String>> = rows
        .iter()
        .map(|row| {
            row.data
                .iter()
                .map(|(k, v)| (k.clone(), value_to_field(v)))
                .collect()
        })
        .collect();

    let body = csv::serialize(&table.columns, &text_rows);
    let filename = export_filename(&table.title);

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/csv; charset=utf-8")
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", filename),
        )
        .header("Access-Control-Allow-Origin", "*")
        .body(full_body(body))
        .unwrap()
}

/// Render a stored value as CSV field text
fn value_to_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Turn a table title into a safe download filename
fn export_filename(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "table.csv".to_string()
    } else {
        format!("{}.csv", stem)
    }
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(name) {
            let raw = parts.next().unwrap_or("");
            return Some(
                urlencoding::decode(raw)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| raw.to_string()),
            );
        }
    }
    None
}

/// Route /tables/* requests. Returns None when the path is not ours.
pub async fn handle_table_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path();
    let method = req.method().clone();

    if path != "/tables" && !path.starts_with("/tables/") {
        return None;
    }

    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let path = path.split('?').next().unwrap_or(path).to_string();
    let segments: Vec<String> = path
        .trim_matches('/')
        .split('/')
        .map(str::to_string)
        .collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, [_]) => handle_list(req, state).await,
        (&Method::POST, [_]) => handle_create(req, state).await,
        (&Method::PUT, [_, id]) => handle_update(req, state, id).await,
        (&Method::DELETE, [_, id]) => handle_delete(req, state, id).await,
        (&Method::GET, [_, id, rows]) if rows == "rows" => handle_rows(req, state, id).await,
        (&Method::DELETE, [_, id, rows]) if rows == "rows" => {
            handle_row_delete(req, state, id).await
        }
        (&Method::PUT, [_, id, rows, row_id]) if rows == "rows" => {
            handle_row_edit(req, state, id, row_id).await
        }
        (&Method::GET, [_, id, export]) if export == "export" => {
            handle_export(req, state, id).await
        }
        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "Not found".into(),
            },
        ),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_export_filename_sanitized() {
        assert_eq!(export_filename("Marksheet"), "Marksheet.csv");
        assert_eq!(export_filename("Term 1 / Marks"), "Term_1___Marks.csv");
        assert_eq!(export_filename("///"), "table.csv");
    }

    #[test]
    fn test_value_to_field() {
        assert_eq!(value_to_field(&json!("80")), "80");
        assert_eq!(value_to_field(&json!(80)), "80");
        assert_eq!(value_to_field(&json!(null)), "");
        assert_eq!(value_to_field(&json!(true)), "true");
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param(Some("rowId=abc123&x=y"), "rowId"),
            Some("abc123".to_string())
        );
        assert_eq!(query_param(Some("x=y"), "rowId"), None);
        assert_eq!(query_param(None, "rowId"), None);
        assert_eq!(
            query_param(Some("rowId=a%20b"), "rowId"),
            Some("a b".to_string())
        );
    }
}
