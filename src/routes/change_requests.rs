//! HTTP routes for the change-request review queue
//!
//! - GET  /change-requests?status=&tableId=      - list requests (admin)
//! - GET  /change-requests/{id}                  - one request (admin)
//! - POST /change-requests/{id}/approve          - approve (admin)
//! - POST /change-requests/{id}/reject           - reject (admin)

use bson::oid::ObjectId;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::schemas::{ChangeRequestDoc, ChangeStatus, Review, ReviewDecision, RowData};
use crate::routes::{
    authenticate, cors_preflight, error_response, json_response, parse_json_body_or_default,
    require_operation, BoxBody, ErrorResponse,
};
use crate::server::AppState;
use crate::types::LecternError;
use crate::workflow::{self, ChangeRequestFilter};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    #[serde(default)]
    pub review_notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestView {
    pub id: String,
    pub table_id: String,
    pub row_id: String,
    pub proposed_changes: RowData,
    pub proof_images: Vec<String>,
    pub requested_by: String,
    pub status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ChangeRequestView {
    pub fn from_doc(request: &ChangeRequestDoc) -> Self {
        Self {
            id: request._id.map(|id| id.to_hex()).unwrap_or_default(),
            table_id: request.table_id.to_hex(),
            row_id: request.row_id.to_hex(),
            proposed_changes: request.proposed_changes.clone(),
            proof_images: request.proof_images.clone(),
            requested_by: request.requested_by.clone(),
            status: request.status,
            reviewed_by: request.reviewed_by.clone(),
            reviewed_at: request.reviewed_at.map(|d| d.to_chrono().to_rfc3339()),
            review_notes: request.review_notes.clone(),
            created_at: request
                .metadata
                .created_at
                .map(|d| d.to_chrono().to_rfc3339()),
        }
    }
}

fn parse_status(raw: &str) -> Result<ChangeStatus, LecternError> {
    match raw {
        "pending" => Ok(ChangeStatus::Pending),
        "approved" => Ok(ChangeStatus::Approved),
        "rejected" => Ok(ChangeStatus::Rejected),
        other => Err(LecternError::Validation(format!(
            "unknown status: {}",
            other
        ))),
    }
}

fn parse_object_id(raw: &str) -> Result<ObjectId, LecternError> {
    ObjectId::parse_str(raw)
        .map_err(|_| LecternError::Validation(format!("invalid id: {}", raw)))
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(name) {
            parts.next()
        } else {
            None
        }
    })
}

/// GET /change-requests
async fn handle_list(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "change_request_list") {
        return error_response(&e);
    }

    let query = req.uri().query();

    let mut filter = ChangeRequestFilter::default();
    match query_param(query, "status").map(parse_status).transpose() {
        Ok(Some(status)) => filter = filter.with_status(status),
        Ok(None) => {}
        Err(e) => return error_response(&e),
    }
    match query_param(query, "tableId")
        .map(parse_object_id)
        .transpose()
    {
        Ok(Some(table_id)) => filter = filter.with_table(table_id),
        Ok(None) => {}
        Err(e) => return error_response(&e),
    }

    match state.store.list_change_requests(filter).await {
        Ok(requests) => {
            let views: Vec<ChangeRequestView> =
                requests.iter().map(ChangeRequestView::from_doc).collect();
            json_response(StatusCode::OK, &views)
        }
        Err(e) => error_response(&e),
    }
}

/// GET /change-requests/{id}
async fn handle_get(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    request_id: &str,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "change_request_list") {
        return error_response(&e);
    }

    let request_id = match parse_object_id(request_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    match state.store.get_change_request(request_id).await {
        Ok(Some(request)) => {
            json_response(StatusCode::OK, &ChangeRequestView::from_doc(&request))
        }
        Ok(None) => error_response(&LecternError::NotFound("change request not found".into())),
        Err(e) => error_response(&e),
    }
}

/// POST /change-requests/{id}/approve and /reject
async fn handle_review(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    request_id: &str,
    decision: ReviewDecision,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = require_operation(&claims, "change_request_review") {
        return error_response(&e);
    }

    let request_id = match parse_object_id(request_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let body: ReviewRequest = match parse_json_body_or_default(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let review = Review {
        decision,
        reviewed_by: claims.user_id,
        notes: body.review_notes,
    };

    match workflow::review_change_request(state.store.as_ref(), request_id, review).await {
        Ok(resolved) => json_response(StatusCode::OK, &ChangeRequestView::from_doc(&resolved)),
        Err(e) => error_response(&e),
    }
}

/// Route /change-requests/* requests. Returns None when the path is not ours.
pub async fn handle_change_request_routes(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path();
    let method = req.method().clone();

    if path != "/change-requests" && !path.starts_with("/change-requests/") {
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
        (&Method::GET, [_, id]) => handle_get(req, state, id).await,
        (&Method::POST, [_, id, action]) if action == "approve" => {
            handle_review(req, state, id, ReviewDecision::Approve).await
        }
        (&Method::POST, [_, id, action]) if action == "reject" => {
            handle_review(req, state, id, ReviewDecision::Reject).await
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

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("pending").unwrap(), ChangeStatus::Pending);
        assert_eq!(parse_status("approved").unwrap(), ChangeStatus::Approved);
        assert!(parse_status("resolved").is_err());
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param(Some("status=pending&tableId=abc"), "status"),
            Some("pending")
        );
        assert_eq!(
            query_param(Some("status=pending&tableId=abc"), "tableId"),
            Some("abc")
        );
        assert_eq!(query_param(Some("status=pending"), "tableId"), None);
    }

    #[test]
    fn test_view_hides_unset_review_fields() {
        let request = ChangeRequestDoc::new(
            ObjectId::new(),
            ObjectId::new(),
            RowData::new(),
            vec![],
            "student-1".into(),
        );
        let json = serde_json::to_value(ChangeRequestView::from_doc(&request)).unwrap();

        assert_eq!(json["status"], "pending");
        assert!(json.get("reviewedBy").is_none());
        assert!(json.get("reviewNotes").is_none());
    }
}
