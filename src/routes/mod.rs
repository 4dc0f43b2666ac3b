//! HTTP routes for Lectern

pub mod auth_routes;
pub mod change_requests;
pub mod health;
pub mod tables;

pub use auth_routes::handle_auth_request;
pub use change_requests::handle_change_request_routes;
pub use health::{health_check, readiness_check, version_info};
pub use tables::handle_table_request;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::auth::{extract_token_from_header, is_operation_allowed, Claims};
use crate::server::AppState;
use crate::types::LecternError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Error body shape shared by every route
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

/// Map a workflow error to its HTTP response. Internal detail is logged
/// here and never leaves the server.
pub fn error_response(err: &LecternError) -> Response<BoxBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }

    json_response(
        status,
        &ErrorResponse {
            error: err.public_message(),
        },
    )
}

pub fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Read and deserialize a JSON request body, capped at 1 MiB
pub async fn parse_json_body<T: for<'de> Deserialize<'de>>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, LecternError> {
    let body = req
        .collect()
        .await
        .map_err(|e| LecternError::Validation(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > 1_048_576 {
        return Err(LecternError::Validation("Request body too large".into()));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| LecternError::Validation(format!("Invalid JSON: {}", e)))
}

/// Like `parse_json_body`, but an empty body yields the default value
pub async fn parse_json_body_or_default<T>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, LecternError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let body = req
        .collect()
        .await
        .map_err(|e| LecternError::Validation(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.is_empty() {
        return Ok(T::default());
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| LecternError::Validation(format!("Invalid JSON: {}", e)))
}

pub fn get_auth_header(req: &Request<hyper::body::Incoming>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Verify the request's bearer token and return its claims
pub fn authenticate(
    req: &Request<hyper::body::Incoming>,
    state: &Arc<AppState>,
) -> Result<Claims, LecternError> {
    let token = extract_token_from_header(get_auth_header(req))
        .ok_or_else(|| LecternError::Unauthorized("No token provided".into()))?;

    let result = state.jwt.verify_token(token);
    if !result.valid {
        return Err(LecternError::Unauthorized(
            result.error.unwrap_or_else(|| "Invalid token".into()),
        ));
    }

    result
        .claims
        .ok_or_else(|| LecternError::Unauthorized("Invalid token".into()))
}

/// Check the caller's permission level against a named operation
pub fn require_operation(claims: &Claims, operation: &str) -> Result<(), LecternError> {
    if is_operation_allowed(operation, claims.permission_level) {
        Ok(())
    } else {
        Err(LecternError::PermissionDenied(format!(
            "{} requires a higher permission level",
            operation
        )))
    }
}
